//! Normalized results handed back to callers.

use super::where_config::SearchStrategy;
use crate::planner::ExecutionStrategy;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Caching disabled for this engine.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

/// A requested relation (or include token) that could not be populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationError {
    pub relation: String,
    pub reason: String,
}

impl RelationError {
    pub fn new(relation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            reason: reason.into(),
        }
    }
}

/// Priority/weight of a search group that took part in the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchGroupHint {
    pub fields: Vec<String>,
    pub strategies: Vec<SearchStrategy>,
    pub priority: i32,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub query_time_ms: f64,
    pub backend: String,
    pub search_algorithms: Vec<SearchStrategy>,
    pub search_groups: Vec<SearchGroupHint>,
    /// Condition keys enforced by the backend configuration.
    pub backend_conditions: Vec<String>,
    pub relations_requested: Vec<String>,
    pub relations_loaded: Vec<String>,
    pub relation_errors: Vec<RelationError>,
    pub fields: Vec<String>,
    pub cache_status: CacheStatus,
    pub execution_strategy: ExecutionStrategy,
    pub fingerprint: String,
}

/// Page of results plus pagination arithmetic and execution metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResult {
    pub items: Vec<JsonValue>,
    /// Absent when the caller opted out of counting.
    pub total: Option<u64>,
    pub page: u32,
    pub limit: u32,
    pub total_pages: Option<u64>,
    pub has_next: bool,
    pub has_prev: bool,
    pub metadata: QueryMetadata,
}

/// Single-entity lookup result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResult {
    pub data: Option<JsonValue>,
    pub metadata: QueryMetadata,
}
