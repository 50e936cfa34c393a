//! Backend-agnostic search filter.
//!
//! Predicates inside a group are OR-combined and groups are OR-combined at
//! the top level. Adapters render this tree into their native form.

use crate::models::{SearchGroupHint, SearchStrategy};
use serde::Serialize;

/// One strategy applied to one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPredicate {
    pub field: String,
    /// Field holds an array; the predicate matches if any element matches.
    pub is_array: bool,
    pub strategy: SearchStrategy,
    /// Value to match. FUZZY predicates carry the normalized term.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    pub fields: Vec<String>,
    pub is_array: bool,
    pub strategies: Vec<SearchStrategy>,
    pub priority: i32,
    pub weight: f64,
    pub predicates: Vec<FieldPredicate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    pub term: String,
    /// Ordered by descending priority, ties in declaration order.
    pub groups: Vec<FilterGroup>,
    /// Distinct strategies in the order they were first applied.
    pub algorithms: Vec<SearchStrategy>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.predicates.is_empty())
    }

    pub fn predicates(&self) -> impl Iterator<Item = &FieldPredicate> {
        self.groups.iter().flat_map(|g| g.predicates.iter())
    }

    pub fn hints(&self) -> Vec<SearchGroupHint> {
        self.groups
            .iter()
            .map(|g| SearchGroupHint {
                fields: g.fields.clone(),
                strategies: g.strategies.clone(),
                priority: g.priority,
                weight: g.weight,
            })
            .collect()
    }
}
