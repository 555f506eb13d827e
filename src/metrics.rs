//! Prometheus metrics for vip-switch.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, records RED metrics for the status
//! endpoint, and exposes the `/metrics` handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Hook runs (counter). Labels: event, outcome.
pub const HOOK_EXECUTIONS_TOTAL: &str = "vipswitch_hook_executions_total";

/// Hook wall time including retries, in seconds (histogram). Labels: event.
pub const HOOK_DURATION_SECONDS: &str = "vipswitch_hook_duration_seconds";

/// Committed role transitions (counter). Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "vipswitch_role_transitions_total";

/// Transitions suppressed by the debounce window (counter).
pub const TRANSITIONS_DEBOUNCED_TOTAL: &str = "vipswitch_role_transitions_debounced_total";

/// Current role: 0 Ready, 1 Slave, 2 Master, 3 Destroy (gauge).
pub const CURRENT_ROLE: &str = "vipswitch_role";

/// Status endpoint requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "vipswitch_http_requests_total";

/// Status endpoint latency in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vipswitch_http_request_duration_seconds";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder. Idempotent.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder.
pub fn describe_metrics() {
    describe_counter!(HOOK_EXECUTIONS_TOTAL, "Hook executions by event and outcome");
    describe_histogram!(
        HOOK_DURATION_SECONDS,
        "Hook execution time in seconds, including retries"
    );
    describe_counter!(TRANSITIONS_TOTAL, "Committed role transitions");
    describe_counter!(
        TRANSITIONS_DEBOUNCED_TOTAL,
        "Role transitions suppressed by debounce"
    );
    describe_gauge!(CURRENT_ROLE, "Current role (0 Ready, 1 Slave, 2 Master, 3 Destroy)");
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total status endpoint requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "Status endpoint request duration in seconds"
    );
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records request counts and latency.
///
/// `/metrics` itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Collapse unknown paths into one label value.
fn normalize_path(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/status" => "/status",
        _ => "other",
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Prometheus exposition text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_known_paths() {
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/status"), "/status");
    }

    #[test]
    fn test_normalize_unknown_paths() {
        assert_eq!(normalize_path("/"), "other");
        assert_eq!(normalize_path("/status/extra"), "other");
        assert_eq!(normalize_path("/wp-login.php"), "other");
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics().unwrap() as *const PrometheusHandle;
        let second = init_metrics().unwrap() as *const PrometheusHandle;
        assert_eq!(first, second);
    }
}
