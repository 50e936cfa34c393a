//! Criteria resolution: backend configuration + caller request → one query description.

use crate::config::PaginationConfig;
use crate::include::resolve_includes;
use crate::models::{
    is_valid_field_name, Conditions, EntityDescriptor, QueryRequest, RelationError,
    SearchContext, SortSpec, WhereConfig,
};
use crate::pagination::{page_and_limit, to_offset_window, OffsetWindow};
use crate::search::{SearchEngine, SearchFilter};
use serde::Serialize;

/// Which default page size applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    General,
    List,
}

/// Fully resolved, backend-agnostic description of one query.
///
/// Built fresh per request and never mutated after it is handed to an adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criteria {
    pub entity: String,
    /// Fixed conditions merged with dynamic ones.
    pub conditions: Conditions,
    pub search: Option<SearchFilter>,
    pub relations: Vec<String>,
    pub fields: Vec<String>,
    /// Include tokens rejected while parsing.
    pub include_errors: Vec<RelationError>,
    pub sort: Option<SortSpec>,
    pub page: u32,
    pub limit: u32,
    pub include_total_count: bool,
}

impl Criteria {
    pub fn window(&self) -> OffsetWindow {
        to_offset_window(self.page, self.limit)
    }

    pub fn condition_keys(&self) -> Vec<String> {
        self.conditions.keys().cloned().collect()
    }
}

pub struct CriteriaResolver {
    search: SearchEngine,
    pagination: PaginationConfig,
}

impl CriteriaResolver {
    pub fn new(search: SearchEngine, pagination: PaginationConfig) -> Self {
        Self { search, pagination }
    }

    pub fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    /// Resolve a request. Never fails: malformed caller input falls back to defaults.
    pub fn resolve(
        &self,
        where_config: &WhereConfig,
        request: &QueryRequest,
        entity: &EntityDescriptor,
        kind: QueryKind,
    ) -> Criteria {
        let default_limit = match kind {
            QueryKind::General => self.pagination.default_limit,
            QueryKind::List => self.pagination.list_default_limit,
        };
        let (page, limit) = page_and_limit(request.page, request.limit, default_limit);

        let term = request
            .search
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let search = self
            .search
            .build_search_filters(&where_config.search_config, term);

        let inclusion = resolve_includes(request.include.as_deref(), &entity.relation_names());

        let sort = request
            .sort
            .as_ref()
            .and_then(|s| s.to_spec())
            .filter(|s| {
                let valid = is_valid_field_name(&s.field);
                if !valid {
                    tracing::debug!(field = %s.field, "Ignoring invalid sort field");
                }
                valid
            })
            .or_else(|| entity.default_sort.clone());

        let mut conditions = where_config.conditions.clone();
        if let Some(dynamic) = &where_config.dynamic_conditions {
            let ctx = SearchContext {
                term,
                search: search.as_ref(),
            };
            for (key, value) in dynamic.evaluate(&ctx) {
                if conditions.contains_key(&key) {
                    tracing::debug!(field = %key, "Dynamic condition shadowed by fixed condition");
                    continue;
                }
                conditions.insert(key, value);
            }
        }

        Criteria {
            entity: entity.name.clone(),
            conditions,
            search,
            relations: inclusion.relations,
            fields: inclusion.fields,
            include_errors: inclusion.errors,
            sort,
            page,
            limit,
            include_total_count: request.include_total_count.unwrap_or(true),
        }
    }
}
