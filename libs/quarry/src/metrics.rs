//! Metrics collection for the query engine
//!
//! Prometheus metrics registered in the default registry. Services embedding
//! the engine expose them with [`gather_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Executed queries by backend, execution strategy and outcome
    pub static ref QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quarry_queries_total",
        "Total number of engine queries",
        &["backend", "strategy", "status"]
    )
    .expect("Failed to register QUERIES_TOTAL");

    /// Backend execution duration (cache hits are not observed here)
    pub static ref QUERY_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "quarry_query_duration_seconds",
        "Backend query execution duration in seconds",
        &["backend", "strategy"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register QUERY_DURATION_SECONDS");

    /// Result cache lookups by result (hit, miss, expired)
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quarry_cache_lookups_total",
        "Result cache lookups",
        &["result"]
    )
    .expect("Failed to register CACHE_LOOKUPS_TOTAL");

    /// Entries currently held by the result cache
    pub static ref CACHE_ENTRIES: IntGauge = register_int_gauge!(
        "quarry_cache_entries",
        "Number of cached query results"
    )
    .expect("Failed to register CACHE_ENTRIES");

    /// Relations that were requested but could not be populated
    pub static ref RELATION_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quarry_relation_errors_total",
        "Relations dropped from results",
        &["entity", "relation"]
    )
    .expect("Failed to register RELATION_ERRORS_TOTAL");

    /// Distinct search configuration errors reported
    pub static ref SEARCH_CONFIG_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "quarry_search_config_errors_total",
        "Distinct invalid search configuration entries"
    )
    .expect("Failed to register SEARCH_CONFIG_ERRORS_TOTAL");
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
