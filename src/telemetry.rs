//! Operational metrics for the tracer itself
//!
//! Prometheus-facade counters and histograms describing what the capture
//! pipeline is doing, rendered by the API router's `/metrics` endpoint.
//! Distinct from [`crate::metrics`], which aggregates the traced
//! application's traffic for the dashboard.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return its render handle
///
/// If a recorder is already installed in this process (a second tracer, or
/// the host application's own), a detached recorder is used instead so the
/// render endpoint keeps working.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle());

    describe_metrics();
    handle
}

fn describe_metrics() {
    describe_counter!("logscope_requests_total", "Total number of traced requests");
    describe_counter!("logscope_errors_total", "Total number of traced error responses");
    describe_histogram!(
        "logscope_request_duration_seconds",
        "Traced request duration in seconds"
    );
    describe_counter!(
        "logscope_capture_failures_total",
        "Capture-path failures that were contained (request unaffected)"
    );
}

/// Record a traced request
pub fn record_request(method: &str, status_class: &str) {
    counter!(
        "logscope_requests_total",
        "method" => method.to_string(),
        "status" => status_class.to_string(),
    )
    .increment(1);
}

/// Record a traced error response
pub fn record_error(method: &str) {
    counter!(
        "logscope_errors_total",
        "method" => method.to_string(),
    )
    .increment(1);
}

/// Record a traced request duration
pub fn record_duration(method: &str, duration: Duration) {
    histogram!(
        "logscope_request_duration_seconds",
        "method" => method.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record a contained capture-path failure
pub fn record_capture_failure(stage: &'static str) {
    counter!(
        "logscope_capture_failures_total",
        "stage" => stage,
    )
    .increment(1);
}

/// Status class label for a response code, e.g. `2xx`
pub fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}
