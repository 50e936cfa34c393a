//! Error types for the query engine

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed backend-authored configuration (e.g. unknown search strategy).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("Lookup into '{collection}' failed: {reason}")]
    LookupFailed { collection: String, reason: String },

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors that fail the current request and are handed to the caller unmodified.
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Store(_)
                | Error::LookupFailed { .. }
                | Error::Timeout(_)
                | Error::InvalidQuery(_)
        )
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Database(_) => "database",
            Error::Store(_) => "store",
            Error::LookupFailed { .. } => "lookup",
            Error::Timeout(_) => "timeout",
            Error::InvalidQuery(_) => "invalid_query",
            Error::Config(_) => "config",
            Error::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_errors_are_classified() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_execution());
        assert!(Error::Store("down".into()).is_execution());
        assert!(!Error::Configuration("bad strategy".into()).is_execution());
    }
}
