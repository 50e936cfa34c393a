//! Backend-authored query configuration.

use crate::search::SearchFilter;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Field → required value. Ordered so that equal condition sets compare and
/// hash identically regardless of insertion order.
pub type Conditions = BTreeMap<String, JsonValue>;

/// Text-matching algorithm applied to a search field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Case-sensitive equality.
    Exact,
    /// Bounded edit distance, case and accent insensitive.
    Fuzzy,
    /// Case-insensitive substring.
    Contains,
    /// Case-insensitive prefix.
    StartsWith,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSearchStrategyError(pub String);

impl fmt::Display for ParseSearchStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown search strategy '{}'", self.0)
    }
}

impl std::error::Error for ParseSearchStrategyError {}

impl FromStr for SearchStrategy {
    type Err = ParseSearchStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(|c| c.to_lowercase())
            .collect();
        match normalized.as_str() {
            "exact" => Ok(Self::Exact),
            "fuzzy" => Ok(Self::Fuzzy),
            "contains" => Ok(Self::Contains),
            "startswith" => Ok(Self::StartsWith),
            _ => Err(ParseSearchStrategyError(s.to_string())),
        }
    }
}

impl SearchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_strategy_name() -> String {
    SearchStrategy::Contains.as_str().to_string()
}

fn default_weight() -> f64 {
    1.0
}

/// A set of fields searched together with the same strategies.
///
/// Strategy names are kept as written so that configuration loaded from files
/// can carry unknown names; those are reported and skipped when the group is
/// evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFieldGroup {
    pub fields: Vec<String>,
    /// The group names a single array-valued field; each element is matched.
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default = "default_strategy_name")]
    pub default_strategy: String,
    /// Higher priorities are evaluated and reported first.
    #[serde(default)]
    pub priority: i32,
    /// Relative contribution (0.0–1.0) when several groups match.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl SearchFieldGroup {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            is_array: false,
            strategies: Vec::new(),
            default_strategy: default_strategy_name(),
            priority: 0,
            weight: default_weight(),
        }
    }

    pub fn array(field: impl Into<String>) -> Self {
        let mut group = Self::new([field.into()]);
        group.is_array = true;
        group
    }

    pub fn default_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.default_strategy = strategy.as_str().to_string();
        self
    }

    pub fn strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategies.push(strategy.as_str().to_string());
        self
    }

    /// Add a strategy by name, as it would appear in a configuration file.
    pub fn strategy_name(mut self, name: impl Into<String>) -> Self {
        self.strategies.push(name.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Read-only view handed to [`DynamicConditions`].
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    /// Trimmed search term, if the caller sent a non-empty one.
    pub term: Option<&'a str>,
    /// Resolved search filter (absent when there is no term).
    pub search: Option<&'a SearchFilter>,
}

type DynamicFn = dyn Fn(&SearchContext<'_>) -> Conditions + Send + Sync;

/// Backend callback computing extra conditions from the resolved search.
#[derive(Clone)]
pub struct DynamicConditions(Arc<DynamicFn>);

impl DynamicConditions {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&SearchContext<'_>) -> Conditions + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn evaluate(&self, ctx: &SearchContext<'_>) -> Conditions {
        (self.0)(ctx)
    }
}

impl fmt::Debug for DynamicConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DynamicConditions(..)")
    }
}

/// Trusted, backend-owned specification of mandatory filters and searchable fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhereConfig {
    /// Always applied; caller input never overrides or relaxes these.
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub search_config: Vec<SearchFieldGroup>,
    #[serde(skip)]
    pub dynamic_conditions: Option<DynamicConditions>,
}

impl WhereConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.insert(field.into(), value.into());
        self
    }

    pub fn search_group(mut self, group: SearchFieldGroup) -> Self {
        self.search_config.push(group);
        self
    }

    pub fn dynamic_conditions<F>(mut self, f: F) -> Self
    where
        F: Fn(&SearchContext<'_>) -> Conditions + Send + Sync + 'static,
    {
        self.dynamic_conditions = Some(DynamicConditions::new(f));
        self
    }
}
