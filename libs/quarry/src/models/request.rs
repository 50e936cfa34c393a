//! Caller-authored (untrusted) request.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Some(Self::Asc),
            "desc" | "descending" | "-1" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn is_ascending(self) -> bool {
        matches!(self, Self::Asc)
    }
}

/// Sort specification (field + direction).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse `name`, `-name`, `name:asc` or `name:desc`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if let Some(field) = value.strip_prefix('-') {
            return Some(Self::desc(field.trim()));
        }

        match value.split_once(':') {
            Some((field, dir)) => Some(Self {
                field: field.trim().to_string(),
                direction: SortDirection::parse(dir)?,
            }),
            None => Some(Self::asc(value)),
        }
    }
}

/// Sort as sent by the caller: either a compact string or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortInput {
    Text(String),
    Spec {
        field: String,
        #[serde(default)]
        direction: Option<String>,
    },
}

impl SortInput {
    pub fn to_spec(&self) -> Option<SortSpec> {
        match self {
            SortInput::Text(text) => SortSpec::parse(text),
            SortInput::Spec { field, direction } => {
                let direction = match direction {
                    Some(d) => SortDirection::parse(d)?,
                    None => SortDirection::Asc,
                };
                Some(SortSpec {
                    field: field.trim().to_string(),
                    direction,
                })
            }
        }
    }
}

/// Caller request. Every field is optional; malformed values fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub search: Option<String>,
    /// Comma-separated relations and/or field names.
    pub include: Option<String>,
    pub sort: Option<SortInput>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// `false` skips the count query; `total` is then absent from the result.
    pub include_total_count: Option<bool>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn include(mut self, include: impl Into<String>) -> Self {
        self.include = Some(include.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(SortInput::Text(sort.into()));
        self
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn without_total_count(mut self) -> Self {
        self.include_total_count = Some(false);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_compact_sort_forms() {
        assert_eq!(SortSpec::parse("name"), Some(SortSpec::asc("name")));
        assert_eq!(SortSpec::parse("-createdAt"), Some(SortSpec::desc("createdAt")));
        assert_eq!(SortSpec::parse("age:desc"), Some(SortSpec::desc("age")));
        assert_eq!(SortSpec::parse("age:sideways"), None);
        assert_eq!(SortSpec::parse("  "), None);
    }

    #[test]
    fn request_accepts_object_sort() {
        let request: QueryRequest = serde_json::from_value(json!({
            "search": "kenniy",
            "sort": { "field": "lastName", "direction": "DESC" },
            "page": 2,
            "includeTotalCount": false
        }))
        .unwrap();

        assert_eq!(
            request.sort.and_then(|s| s.to_spec()),
            Some(SortSpec::desc("lastName"))
        );
        assert_eq!(request.page, Some(2));
        assert_eq!(request.include_total_count, Some(false));
    }
}
