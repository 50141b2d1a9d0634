//! Prometheus metrics for matching-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

/// Counter for HTTP operations by name and outcome.
pub static OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_operations_total",
        "Total number of matching-service operations",
        &["operation", "status"]
    )
    .expect("Failed to register OPERATIONS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "matching_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for matching runs by final status.
pub static MATCH_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_runs_total",
        "Total number of matching runs",
        &["status"]
    )
    .expect("Failed to register MATCH_RUNS")
});

pub static RUN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "matching_run_duration_seconds",
        "Matching run duration in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .expect("Failed to register RUN_DURATION")
});

/// Counter for created matches.
pub static MATCHES_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_matches_created_total",
        "Total number of matches created",
        &["match_type"]
    )
    .expect("Failed to register MATCHES_CREATED")
});

/// Counter for approval decisions.
pub static MATCH_DECISIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_match_decisions_total",
        "Total number of match approval decisions",
        &["decision"]
    )
    .expect("Failed to register MATCH_DECISIONS")
});

/// Counter for imports by final status.
pub static IMPORTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_imports_total",
        "Total number of transaction imports",
        &["status"]
    )
    .expect("Failed to register IMPORTS")
});

/// Counter for imported rows by outcome.
pub static IMPORT_ROWS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_import_rows_total",
        "Total number of imported rows",
        &["outcome"]
    )
    .expect("Failed to register IMPORT_ROWS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "matching_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&OPERATIONS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&MATCH_RUNS);
    Lazy::force(&RUN_DURATION);
    Lazy::force(&MATCHES_CREATED);
    Lazy::force(&MATCH_DECISIONS);
    Lazy::force(&IMPORTS);
    Lazy::force(&IMPORT_ROWS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record an operation outcome.
pub fn record_operation(operation: &str, status: &str) {
    OPERATIONS.with_label_values(&[operation, status]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Record a finished matching run.
pub fn record_run(status: &str, duration_secs: f64) {
    MATCH_RUNS.with_label_values(&[status]).inc();
    RUN_DURATION.observe(duration_secs);
}

/// Record created matches.
pub fn record_matches_created(match_type: &str, count: u64) {
    MATCHES_CREATED.with_label_values(&[match_type]).inc_by(count as f64);
}

/// Record an approval decision.
pub fn record_decision(decision: &str) {
    MATCH_DECISIONS.with_label_values(&[decision]).inc();
}

/// Record an import and its row outcomes.
pub fn record_import(status: &str, success_rows: i32, error_rows: i32) {
    IMPORTS.with_label_values(&[status]).inc();
    IMPORT_ROWS
        .with_label_values(&["success"])
        .inc_by(success_rows.max(0) as f64);
    IMPORT_ROWS
        .with_label_values(&["error"])
        .inc_by(error_rows.max(0) as f64);
}
