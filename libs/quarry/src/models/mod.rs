//! Data model shared by the engine and its callers

mod entity;
mod request;
mod result;
mod where_config;

pub use entity::{EntityDescriptor, RelationDef, RelationKind};
pub use request::{QueryRequest, SortDirection, SortInput, SortSpec};
pub use result::{
    CacheStatus, EntityResult, PaginatedResult, QueryMetadata, RelationError, SearchGroupHint,
};
pub use where_config::{
    Conditions, DynamicConditions, ParseSearchStrategyError, SearchContext, SearchFieldGroup,
    SearchStrategy, WhereConfig,
};

/// Identifier accepted from callers for fields and sort keys.
pub fn is_valid_field_name(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_validation() {
        assert!(is_valid_field_name("firstName"));
        assert!(is_valid_field_name("_id"));
        assert!(!is_valid_field_name(""));
        assert!(!is_valid_field_name("1st"));
        assert!(!is_valid_field_name("name; DROP TABLE"));
        assert!(!is_valid_field_name("a.b"));
    }
}
