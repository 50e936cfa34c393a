//! Include-list parsing: relations vs. scalar field selections.
//!
//! Parsing never fails. Tokens that are neither a declared relation nor a
//! valid field identifier are reported as [`RelationError`] entries.

use crate::models::{is_valid_field_name, RelationError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inclusion {
    /// Declared relations, in request order, deduplicated.
    pub relations: Vec<String>,
    /// Scalar field projection; empty means the default projection.
    pub fields: Vec<String>,
    pub errors: Vec<RelationError>,
}

pub fn resolve_includes(include: Option<&str>, known_relations: &[&str]) -> Inclusion {
    let mut out = Inclusion::default();
    let Some(include) = include else {
        return out;
    };

    for token in include.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if known_relations.contains(&token) {
            if !out.relations.iter().any(|r| r == token) {
                out.relations.push(token.to_string());
            }
        } else if is_valid_field_name(token) {
            if !out.fields.iter().any(|f| f == token) {
                out.fields.push(token.to_string());
            }
        } else {
            tracing::debug!(token = %token, "Ignoring unresolvable include token");
            out.errors.push(RelationError::new(
                token,
                "not a known relation or a valid field name",
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_relations_and_fields() {
        let inclusion = resolve_includes(Some("a,b,c"), &["a", "b"]);
        assert_eq!(inclusion.relations, vec!["a", "b"]);
        assert_eq!(inclusion.fields, vec!["c"]);
        assert!(inclusion.errors.is_empty());
    }

    #[test]
    fn trims_and_drops_empty_tokens() {
        let inclusion = resolve_includes(Some(" profile ,, email , "), &["profile"]);
        assert_eq!(inclusion.relations, vec!["profile"]);
        assert_eq!(inclusion.fields, vec!["email"]);
    }

    #[test]
    fn empty_include_means_default_projection() {
        assert_eq!(resolve_includes(None, &["a"]), Inclusion::default());
        assert_eq!(resolve_includes(Some(""), &["a"]), Inclusion::default());
        assert_eq!(resolve_includes(Some(" , "), &["a"]), Inclusion::default());
    }

    #[test]
    fn invalid_tokens_become_errors() {
        let inclusion = resolve_includes(Some("orders,drop table,x\"y"), &["orders"]);
        assert_eq!(inclusion.relations, vec!["orders"]);
        assert!(inclusion.fields.is_empty());
        let bad: Vec<&str> = inclusion
            .errors
            .iter()
            .map(|e| e.relation.as_str())
            .collect();
        assert_eq!(bad, vec!["drop table", "x\"y"]);
    }

    #[test]
    fn duplicates_are_collapsed() {
        let inclusion = resolve_includes(Some("a,a,name,name"), &["a"]);
        assert_eq!(inclusion.relations, vec!["a"]);
        assert_eq!(inclusion.fields, vec!["name"]);
    }
}
