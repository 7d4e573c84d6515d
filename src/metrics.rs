/// Metrics for the auth service
///
/// Prometheus counters for:
/// - HTTP request counts and latencies
/// - Authorization decisions per strategy
/// - Credential flow outcomes (OTP, reset tokens, API keys, logins)

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    /// Authorization strategy evaluations by outcome
    pub static ref AUTHORIZATION_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "authorization_decisions_total",
        "Authorization strategy evaluations",
        &["strategy", "outcome"]
    )
    .unwrap();

    /// Credential flow results (otp_issue, otp_validate, reset_request, ...)
    pub static ref CREDENTIAL_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "credential_events_total",
        "Credential flow outcomes",
        &["flow", "outcome"]
    )
    .unwrap();

    /// Session tokens issued
    pub static ref SESSIONS_ISSUED_TOTAL: IntCounter = register_int_counter!(
        "sessions_issued_total",
        "Total number of session tokens issued"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record one strategy evaluation
pub fn record_authorization(strategy: &str, admitted: bool) {
    let outcome = if admitted { "admitted" } else { "rejected" };
    AUTHORIZATION_DECISIONS_TOTAL
        .with_label_values(&[strategy, outcome])
        .inc();
}

/// Record the result of a credential flow
pub fn record_credential_event(flow: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    CREDENTIAL_EVENTS_TOTAL
        .with_label_values(&[flow, outcome])
        .inc();
}

pub fn record_session_issued() {
    SESSIONS_ISSUED_TOTAL.inc();
}
