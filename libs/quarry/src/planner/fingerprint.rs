//! Deterministic digest of a resolved query.

use crate::criteria::Criteria;
use crate::models::EntityDescriptor;
use crate::Result;
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};

/// Recursively sort object keys so that logically equal values serialize identically.
fn canonicalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(String, JsonValue)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, canonicalize(v));
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Hex SHA-256 over the adapter's cache scope, the entity descriptor and the
/// canonical criteria.
///
/// Conditions are keyed maps, so their order never matters. Sort, relations
/// and fields keep their order.
pub fn fingerprint(scope: &str, entity: &EntityDescriptor, criteria: &Criteria) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(&canonicalize(serde_json::to_value(entity)?))?);
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(&canonicalize(serde_json::to_value(criteria)?))?);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conditions, RelationDef, SortSpec};
    use serde_json::json;

    fn entity() -> EntityDescriptor {
        EntityDescriptor::new("user", "users")
            .relation(RelationDef::many("orders", "orders", "id", "userId"))
    }

    fn criteria(conditions: Conditions) -> Criteria {
        Criteria {
            entity: "user".to_string(),
            conditions,
            search: None,
            relations: vec!["orders".to_string()],
            fields: Vec::new(),
            include_errors: Vec::new(),
            sort: Some(SortSpec::asc("lastName")),
            page: 1,
            limit: 20,
            include_total_count: true,
        }
    }

    #[test]
    fn condition_order_does_not_matter() {
        let mut a = Conditions::new();
        a.insert("status".into(), json!("active"));
        a.insert("meta".into(), json!({ "b": 1, "a": 2 }));
        let mut b = Conditions::new();
        b.insert("meta".into(), json!({ "a": 2, "b": 1 }));
        b.insert("status".into(), json!("active"));

        assert_eq!(
            fingerprint("document:users", &entity(), &criteria(a)).unwrap(),
            fingerprint("document:users", &entity(), &criteria(b)).unwrap()
        );
    }

    #[test]
    fn page_sort_and_scope_change_the_digest() {
        let base = criteria(Conditions::new());
        let fp = fingerprint("document:users", &entity(), &base).unwrap();
        assert_eq!(fp.len(), 64);

        let mut next_page = base.clone();
        next_page.page = 2;
        assert_ne!(fp, fingerprint("document:users", &entity(), &next_page).unwrap());

        let mut resorted = base.clone();
        resorted.sort = Some(SortSpec::desc("lastName"));
        assert_ne!(fp, fingerprint("document:users", &entity(), &resorted).unwrap());

        assert_ne!(fp, fingerprint("relational:users", &entity(), &base).unwrap());
    }

    #[test]
    fn entity_definition_changes_the_digest() {
        let base = criteria(Conditions::new());
        let fp = fingerprint("document:memory:1", &entity(), &base).unwrap();

        let rekeyed = entity().primary_key("_id");
        assert_ne!(fp, fingerprint("document:memory:1", &rekeyed, &base).unwrap());

        let rejoined = EntityDescriptor::new("user", "users")
            .relation(RelationDef::many("orders", "orders", "id", "customerId"));
        assert_ne!(fp, fingerprint("document:memory:1", &rejoined, &base).unwrap());
    }
}
