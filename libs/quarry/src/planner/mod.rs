//! Adaptive query planning and result caching
//!
//! The planner:
//! - fingerprints resolved criteria
//! - picks count-and-fetch (parallel) or fetch-only execution
//! - serves fresh cached results without touching the backend
//! - shapes backend rows into the paginated envelope

mod cache;
mod fingerprint;

pub use cache::{CacheEntry, QueryCache};
pub use fingerprint::fingerprint;

use crate::adapter::{BackendAdapter, RawPage};
use crate::config::EngineConfig;
use crate::criteria::Criteria;
use crate::metrics::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, RELATION_ERRORS_TOTAL};
use crate::models::{CacheStatus, PaginatedResult, QueryMetadata};
use crate::pagination::{shape, shape_without_total, OffsetWindow};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Count and page queries issued concurrently (or as one facet round trip).
    CountAndFetch,
    /// Page query only; one extra row is fetched to detect a next page.
    FetchOnly,
    /// Served from the result cache.
    Cached,
}

impl ExecutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CountAndFetch => "count_and_fetch",
            Self::FetchOnly => "fetch_only",
            Self::Cached => "cached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub fingerprint: String,
    pub strategy: ExecutionStrategy,
    pub window: OffsetWindow,
    /// Rows the adapter should request (`take`, or `take + 1` for fetch-only).
    pub fetch_limit: u32,
}

impl ExecutionPlan {
    pub fn needs_count(&self) -> bool {
        matches!(self.strategy, ExecutionStrategy::CountAndFetch)
    }
}

pub struct QueryPlanner {
    cache: Option<QueryCache>,
    timeout: Option<Duration>,
}

impl QueryPlanner {
    pub fn new(config: &EngineConfig) -> Self {
        let cache = if config.cache.enabled {
            NonZeroUsize::new(config.cache.capacity)
                .map(|capacity| QueryCache::new(capacity, config.cache.ttl()))
        } else {
            None
        };
        Self {
            cache,
            timeout: config.execution.query_timeout(),
        }
    }

    pub fn cache(&self) -> Option<&QueryCache> {
        self.cache.as_ref()
    }

    pub fn plan<A>(&self, adapter: &A, criteria: &Criteria) -> Result<ExecutionPlan>
    where
        A: BackendAdapter + ?Sized,
    {
        let window = criteria.window();
        let strategy = if criteria.include_total_count {
            ExecutionStrategy::CountAndFetch
        } else {
            ExecutionStrategy::FetchOnly
        };
        let fetch_limit = match strategy {
            ExecutionStrategy::FetchOnly => window.take + 1,
            _ => window.take,
        };

        Ok(ExecutionPlan {
            fingerprint: fingerprint(&adapter.cache_scope(), adapter.entity(), criteria)?,
            strategy,
            window,
            fetch_limit,
        })
    }

    /// Serve from cache when fresh, otherwise execute through the adapter and cache the result.
    pub async fn execute_with_cache<A>(
        &self,
        criteria: &Criteria,
        adapter: &A,
    ) -> Result<PaginatedResult>
    where
        A: BackendAdapter + ?Sized,
    {
        let started = Instant::now();
        let backend = adapter.backend().as_str();
        let plan = self.plan(adapter, criteria)?;

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&plan.fingerprint) {
                let mut result = entry.result.clone();
                result.metadata.cache_status = CacheStatus::Hit;
                result.metadata.execution_strategy = ExecutionStrategy::Cached;
                result.metadata.query_time_ms = elapsed_ms(started);
                QUERIES_TOTAL
                    .with_label_values(&[backend, ExecutionStrategy::Cached.as_str(), "ok"])
                    .inc();
                tracing::debug!(
                    entity = %criteria.entity,
                    fingerprint = %plan.fingerprint,
                    cache_status = "hit",
                    "Served query from cache"
                );
                return Ok(result);
            }
        }

        let query = adapter.build_query(criteria, &plan)?;
        tracing::debug!(
            entity = %criteria.entity,
            fingerprint = %plan.fingerprint,
            strategy = plan.strategy.as_str(),
            skip = plan.window.skip,
            take = plan.window.take,
            "Executing query"
        );

        let exec_started = Instant::now();
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, adapter.execute(&query))
                .await
                .unwrap_or_else(|_| Err(Error::Timeout(limit))),
            None => adapter.execute(&query).await,
        };
        QUERY_DURATION_SECONDS
            .with_label_values(&[backend, plan.strategy.as_str()])
            .observe(exec_started.elapsed().as_secs_f64());

        let raw = match outcome {
            Ok(raw) => raw,
            Err(e) => {
                QUERIES_TOTAL
                    .with_label_values(&[backend, plan.strategy.as_str(), "error"])
                    .inc();
                tracing::warn!(
                    entity = %criteria.entity,
                    fingerprint = %plan.fingerprint,
                    error = %e,
                    "Query execution failed"
                );
                return Err(e);
            }
        };
        QUERIES_TOTAL
            .with_label_values(&[backend, plan.strategy.as_str(), "ok"])
            .inc();

        let cache_status = if self.cache.is_some() {
            CacheStatus::Miss
        } else {
            CacheStatus::Bypass
        };
        let result = shape_page(criteria, &plan, raw, backend, cache_status, started);

        if let Some(cache) = &self.cache {
            cache.insert(plan.fingerprint.clone(), result.clone());
        }

        tracing::debug!(
            entity = %criteria.entity,
            fingerprint = %plan.fingerprint,
            cache_status = cache_status.as_str(),
            elapsed_ms = result.metadata.query_time_ms,
            items = result.items.len(),
            "Query completed"
        );
        Ok(result)
    }

    pub fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn shape_page(
    criteria: &Criteria,
    plan: &ExecutionPlan,
    raw: RawPage,
    backend: &str,
    cache_status: CacheStatus,
    started: Instant,
) -> PaginatedResult {
    let RawPage {
        mut rows,
        total,
        relations_loaded,
        relation_errors,
    } = raw;

    let take = plan.window.take as usize;
    let page_shape = match (plan.strategy, total) {
        (ExecutionStrategy::CountAndFetch, Some(total)) => shape(total, criteria.page, criteria.limit),
        _ => {
            let has_more = rows.len() > take;
            shape_without_total(criteria.page, has_more)
        }
    };
    rows.truncate(take);

    for err in &relation_errors {
        RELATION_ERRORS_TOTAL
            .with_label_values(&[criteria.entity.as_str(), err.relation.as_str()])
            .inc();
        tracing::warn!(
            entity = %criteria.entity,
            relation = %err.relation,
            reason = %err.reason,
            "Relation could not be populated"
        );
    }

    let mut all_errors = criteria.include_errors.clone();
    all_errors.extend(relation_errors);

    let metadata = QueryMetadata {
        query_time_ms: elapsed_ms(started),
        backend: backend.to_string(),
        search_algorithms: criteria
            .search
            .as_ref()
            .map(|s| s.algorithms.clone())
            .unwrap_or_default(),
        search_groups: criteria
            .search
            .as_ref()
            .map(|s| s.hints())
            .unwrap_or_default(),
        backend_conditions: criteria.condition_keys(),
        relations_requested: criteria.relations.clone(),
        relations_loaded,
        relation_errors: all_errors,
        fields: criteria.fields.clone(),
        cache_status,
        execution_strategy: plan.strategy,
        fingerprint: plan.fingerprint.clone(),
    };

    page_shape.into_result(rows, criteria.page, criteria.limit, metadata)
}
