//! Backend adapters
//!
//! An adapter translates resolved [`Criteria`] into one backend's native
//! query form and executes it. Everything backend-agnostic (criteria
//! resolution, planning, caching, page shaping) lives above this seam.

mod condition;
pub mod document;
pub mod relational;

pub use condition::{parse_condition, Comparison, ConditionOp};
pub use document::{DocumentAdapter, DocumentQuery, DocumentStore, MemoryDocumentStore};
pub use relational::{
    BindValue, PgExecutor, RelationalAdapter, RelationalQuery, SqlExecutor, SqlQuery,
};

use crate::criteria::Criteria;
use crate::models::{EntityDescriptor, RelationDef, RelationError};
use crate::planner::ExecutionPlan;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Relational,
    Document,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Document => "document",
        }
    }
}

/// Rows produced by one execution, before pagination shaping.
///
/// In fetch-only mode `rows` may hold one row more than the page size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub rows: Vec<JsonValue>,
    pub total: Option<u64>,
    pub relations_loaded: Vec<String>,
    pub relation_errors: Vec<RelationError>,
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Native query form, built once per execution.
    type Query: Send + Sync + Debug;

    fn backend(&self) -> Backend;

    fn entity(&self) -> &EntityDescriptor;

    /// Identifies the data this adapter reads (store, pool, tenant). Cached
    /// results are only shared between adapters with the same scope.
    fn cache_scope(&self) -> String;

    /// Translate criteria into the native query. Pure; touches no I/O.
    fn build_query(&self, criteria: &Criteria, plan: &ExecutionPlan) -> Result<Self::Query>;

    /// Run the query. Relation failures degrade into `relation_errors`;
    /// any other backend failure is returned as an error.
    async fn execute(&self, query: &Self::Query) -> Result<RawPage>;

    /// Native query rendered for display.
    fn explain(&self, query: &Self::Query) -> JsonValue;
}

/// Relations named in the criteria, split into the ones this entity declares
/// and errors for the rest.
///
/// Criteria from [`crate::criteria::CriteriaResolver`] only name declared
/// relations; this guards `Criteria` built by hand, whose fields are public.
pub(crate) fn declared_relations(
    entity: &EntityDescriptor,
    requested: &[String],
) -> (Vec<RelationDef>, Vec<RelationError>) {
    let mut found = Vec::new();
    let mut errors = Vec::new();
    for name in requested {
        match entity.find_relation(name) {
            Some(def) => found.push(def.clone()),
            None => errors.push(RelationError::new(
                name.clone(),
                format!("relation is not declared on {}", entity.name),
            )),
        }
    }
    (found, errors)
}
