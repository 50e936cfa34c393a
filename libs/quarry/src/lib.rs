//! Quarry - unified query engine
//!
//! One query surface over relational and document stores:
//! - Criteria resolution from backend-owned configuration and caller input
//! - Multi-strategy search (exact, fuzzy, contains, starts-with)
//! - Relation inclusion with graceful degradation
//! - Pagination arithmetic and fetch-only execution
//! - Fingerprinted result cache with TTL and LRU eviction

#![allow(
    clippy::too_many_arguments, // Adapter helpers thread several builders through
)]

pub mod adapter;
pub mod config;
pub mod criteria;
pub mod engine;
pub mod error;
pub mod include;
pub mod metrics;
pub mod models;
pub mod pagination;
pub mod planner;
pub mod search;

pub use adapter::{
    Backend, BackendAdapter, DocumentAdapter, DocumentStore, MemoryDocumentStore, PgExecutor,
    RawPage, RelationalAdapter, SqlExecutor,
};
pub use config::EngineConfig;
pub use criteria::{Criteria, QueryKind};
pub use engine::{Explanation, QueryEngine};
pub use error::{Error, Result};
pub use models::{
    EntityDescriptor, EntityResult, PaginatedResult, QueryRequest, RelationDef, SearchFieldGroup,
    SearchStrategy, WhereConfig,
};
