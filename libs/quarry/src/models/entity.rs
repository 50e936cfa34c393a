//! Entity declarations: where an entity lives and which relations it knows.

use super::request::SortSpec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Populated as a single object (or null).
    One,
    /// Populated as an array.
    Many,
}

/// A named association that may be populated into query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    pub name: String,
    /// Table or collection holding the related entities.
    pub target: String,
    /// Field on this entity.
    pub local_field: String,
    /// Field on the related entity matched against `local_field`.
    pub foreign_field: String,
    pub kind: RelationKind,
}

impl RelationDef {
    pub fn one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            kind: RelationKind::One,
        }
    }

    pub fn many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::Many,
            ..Self::one(name, target, local_field, foreign_field)
        }
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// Entity type as seen by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    pub name: String,
    /// Table (relational) or collection (document).
    pub source: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub default_sort: Option<SortSpec>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            primary_key: default_primary_key(),
            default_sort: None,
            relations: Vec::new(),
        }
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn default_sort(mut self, sort: SortSpec) -> Self {
        self.default_sort = Some(sort);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn relation_names(&self) -> Vec<&str> {
        self.relations.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn find_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}
