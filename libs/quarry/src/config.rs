//! Engine configuration
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! working engine. Values can be overridden through `QUARRY__*` environment
//! variables, e.g. `QUARRY__CACHE__TTL_MS=2000`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hard upper bound for `limit`; larger requests are clamped.
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pagination: PaginationConfig,
    pub search: SearchSettings,
    pub cache: CacheConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Default page size for general queries.
    pub default_limit: u32,
    /// Default page size for list endpoints.
    pub list_default_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            list_default_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Terms shorter than this (in characters) never use FUZZY; CONTAINS is used instead.
    pub min_fuzzy_length: usize,
    /// Terms longer than this never use FUZZY either.
    pub max_fuzzy_length: usize,
    /// Maximum Levenshtein distance accepted by FUZZY.
    pub fuzzy_max_edits: usize,
    /// Upper bound on alternatives in a generated fuzzy regex.
    pub max_fuzzy_alternatives: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_fuzzy_length: 2,
            max_fuzzy_length: 64,
            fuzzy_max_edits: 1,
            max_fuzzy_alternatives: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum number of cached results (least recently used are evicted).
    pub capacity: usize,
    /// Age after which a cached result is no longer served.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1024,
            ttl_ms: 5_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Backend execution timeout; 0 disables it.
    pub query_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 30_000,
        }
    }
}

impl ExecutionConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_ms > 0).then(|| Duration::from_millis(self.query_timeout_ms))
    }
}

impl EngineConfig {
    /// Load configuration from an optional file plus `QUARRY__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("QUARRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("pagination.default_limit", self.pagination.default_limit),
            (
                "pagination.list_default_limit",
                self.pagination.list_default_limit,
            ),
        ] {
            if value == 0 || value > MAX_LIMIT {
                return Err(Error::Configuration(format!(
                    "{name} must be between 1 and {MAX_LIMIT}, got {value}"
                )));
            }
        }

        if self.search.min_fuzzy_length == 0 {
            return Err(Error::Configuration(
                "search.min_fuzzy_length must be at least 1".to_string(),
            ));
        }

        if self.search.max_fuzzy_length < self.search.min_fuzzy_length {
            return Err(Error::Configuration(format!(
                "search.max_fuzzy_length ({}) must not be below search.min_fuzzy_length ({})",
                self.search.max_fuzzy_length, self.search.min_fuzzy_length
            )));
        }

        if self.search.max_fuzzy_alternatives == 0 {
            return Err(Error::Configuration(
                "search.max_fuzzy_alternatives must be at least 1".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(Error::Configuration(
                "cache.capacity must be positive when the cache is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pagination.default_limit, 10);
        assert_eq!(config.pagination.list_default_limit, 20);
        assert_eq!(config.search.min_fuzzy_length, 2);
        assert_eq!(config.search.max_fuzzy_length, 64);
    }

    #[test]
    fn rejects_default_limit_above_max() {
        let mut config = EngineConfig::default();
        config.pagination.default_limit = MAX_LIMIT + 1;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn zero_timeout_disables_timeout() {
        let execution = ExecutionConfig {
            query_timeout_ms: 0,
        };
        assert!(execution.query_timeout().is_none());
    }
}
