//! Engine facade: resolve, plan, execute, shape.

use crate::adapter::BackendAdapter;
use crate::config::EngineConfig;
use crate::criteria::{Criteria, CriteriaResolver, QueryKind};
use crate::models::{EntityResult, PaginatedResult, QueryRequest, WhereConfig};
use crate::planner::{ExecutionStrategy, QueryPlanner};
use crate::search::SearchEngine;
use crate::Result;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// What a query would do, without running it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub backend: String,
    pub criteria: Criteria,
    pub fingerprint: String,
    pub strategy: ExecutionStrategy,
    pub skip: u64,
    pub take: u32,
    pub fetch_limit: u32,
    pub query: JsonValue,
}

/// One engine is shared by every request of a service; the result cache
/// lives inside it.
pub struct QueryEngine {
    config: EngineConfig,
    resolver: CriteriaResolver,
    planner: QueryPlanner,
}

impl QueryEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let resolver = CriteriaResolver::new(
            SearchEngine::new(config.search.clone()),
            config.pagination.clone(),
        );
        let planner = QueryPlanner::new(&config);
        Ok(Self {
            config,
            resolver,
            planner,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub fn resolve<A>(
        &self,
        adapter: &A,
        where_config: &WhereConfig,
        request: &QueryRequest,
        kind: QueryKind,
    ) -> Criteria
    where
        A: BackendAdapter + ?Sized,
    {
        self.resolver
            .resolve(where_config, request, adapter.entity(), kind)
    }

    /// General query; `limit` defaults to `pagination.default_limit`.
    pub async fn query<A>(
        &self,
        adapter: &A,
        where_config: &WhereConfig,
        request: &QueryRequest,
    ) -> Result<PaginatedResult>
    where
        A: BackendAdapter + ?Sized,
    {
        self.run(adapter, where_config, request, QueryKind::General)
            .await
    }

    /// List query; `limit` defaults to `pagination.list_default_limit`.
    pub async fn list<A>(
        &self,
        adapter: &A,
        where_config: &WhereConfig,
        request: &QueryRequest,
    ) -> Result<PaginatedResult>
    where
        A: BackendAdapter + ?Sized,
    {
        self.run(adapter, where_config, request, QueryKind::List)
            .await
    }

    /// First matching entity. Page and limit in `request` are ignored and
    /// no count is issued.
    pub async fn find_one<A>(
        &self,
        adapter: &A,
        where_config: &WhereConfig,
        request: &QueryRequest,
    ) -> Result<EntityResult>
    where
        A: BackendAdapter + ?Sized,
    {
        let request = request.clone().page(1).limit(1).without_total_count();
        let result = self
            .run(adapter, where_config, &request, QueryKind::General)
            .await?;
        Ok(EntityResult {
            data: result.items.into_iter().next(),
            metadata: result.metadata,
        })
    }

    pub fn explain<A>(
        &self,
        adapter: &A,
        where_config: &WhereConfig,
        request: &QueryRequest,
        kind: QueryKind,
    ) -> Result<Explanation>
    where
        A: BackendAdapter + ?Sized,
    {
        let criteria = self.resolve(adapter, where_config, request, kind);
        let plan = self.planner.plan(adapter, &criteria)?;
        let query = adapter.build_query(&criteria, &plan)?;
        Ok(Explanation {
            backend: adapter.backend().as_str().to_string(),
            fingerprint: plan.fingerprint.clone(),
            strategy: plan.strategy,
            skip: plan.window.skip,
            take: plan.window.take,
            fetch_limit: plan.fetch_limit,
            query: adapter.explain(&query),
            criteria,
        })
    }

    /// Drop every cached result.
    pub fn invalidate_cache(&self) {
        self.planner.invalidate();
        tracing::debug!("Query cache invalidated");
    }

    async fn run<A>(
        &self,
        adapter: &A,
        where_config: &WhereConfig,
        request: &QueryRequest,
        kind: QueryKind,
    ) -> Result<PaginatedResult>
    where
        A: BackendAdapter + ?Sized,
    {
        let criteria = self.resolve(adapter, where_config, request, kind);
        self.planner.execute_with_cache(&criteria, adapter).await
    }
}
