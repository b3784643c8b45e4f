//! Prometheus recorder and the metric catalogue

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const HTTP_REQUESTS_TOTAL: &str = "identity_core_http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "identity_core_http_request_duration_seconds";
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "identity_core_http_requests_in_flight";
pub const OPERATIONS_TOTAL: &str = "identity_core_operations_total";
pub const CACHE_LOOKUPS_TOTAL: &str = "identity_core_cache_lookups_total";
pub const BEST_EFFORT_FAILURES_TOTAL: &str = "identity_core_best_effort_failures_total";

/// Latency buckets in seconds. Argon2 verification dominates login, so the
/// upper buckets stay wide.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the global Prometheus recorder and return the render handle.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)
        .context("Invalid histogram buckets")?
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// HELP/TYPE lines for every metric, plus zeroed operation counters so a
/// fresh process already exports the series.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        HTTP_REQUESTS_IN_FLIGHT,
        "Number of HTTP requests currently being processed"
    );
    describe_counter!(
        OPERATIONS_TOTAL,
        "Identity operations by outcome (ok or error kind)"
    );
    describe_counter!(
        CACHE_LOOKUPS_TOTAL,
        "Cache-aside lookups by cache and result (hit/miss/error/corrupt)"
    );
    describe_counter!(
        BEST_EFFORT_FAILURES_TOTAL,
        "Swallowed failures of login events and cache writes"
    );

    for op in ["register", "login", "is_admin"] {
        counter!(OPERATIONS_TOTAL, "op" => op, "result" => "ok").absolute(0);
    }
}

pub fn record_operation(op: &'static str, result: &'static str) {
    counter!(OPERATIONS_TOTAL, "op" => op, "result" => result).increment(1);
}

pub fn record_cache_lookup(cache: &'static str, result: &'static str) {
    counter!(CACHE_LOOKUPS_TOTAL, "cache" => cache, "result" => result).increment(1);
}

pub fn record_best_effort_failure(op: &'static str, kind: &'static str) {
    counter!(BEST_EFFORT_FAILURES_TOTAL, "op" => op, "kind" => kind).increment(1);
}
