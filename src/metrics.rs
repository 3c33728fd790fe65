//! Metrics helpers for the gateway.
//!
//! Thin wrappers around the `metrics` crate macros plus a Prometheus recorder
//! whose handle renders the text exposition served at `GET /metrics`.
//!
//! Provided metrics (labels vary by family):
//! * `gatekeep_requests_total` (counter: route, method, status)
//! * `gatekeep_request_duration_seconds` (histogram: route, method)
//! * `gatekeep_backend_requests_total` (counter: route, method, outcome)
//! * `gatekeep_backend_request_duration_seconds` (histogram: route)
//! * `gatekeep_rate_limited_total` (counter)
//! * `gatekeep_auth_failures_total` (counter: reason)
//! * `gatekeep_rate_limiter_tracked_clients` (gauge)
//!
//! Recording without an installed recorder is a no-op, so library users and
//! tests never have to call [`init_metrics`].
use std::time::{Duration, Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const GATEKEEP_REQUESTS_TOTAL: &str = "gatekeep_requests_total";
pub const GATEKEEP_REQUEST_DURATION_SECONDS: &str = "gatekeep_request_duration_seconds";
pub const GATEKEEP_BACKEND_REQUESTS_TOTAL: &str = "gatekeep_backend_requests_total";
pub const GATEKEEP_BACKEND_REQUEST_DURATION_SECONDS: &str =
    "gatekeep_backend_request_duration_seconds";
pub const GATEKEEP_RATE_LIMITED_TOTAL: &str = "gatekeep_rate_limited_total";
pub const GATEKEEP_AUTH_FAILURES_TOTAL: &str = "gatekeep_auth_failures_total";
pub const GATEKEEP_TRACKED_CLIENTS: &str = "gatekeep_rate_limiter_tracked_clients";

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

fn describe_metrics() {
    describe_counter!(
        GATEKEEP_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        GATEKEEP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        GATEKEEP_BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests forwarded to backend services."
    );
    describe_histogram!(
        GATEKEEP_BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of requests forwarded to backend services."
    );
    describe_counter!(
        GATEKEEP_RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests rejected by the per-client rate limiter."
    );
    describe_counter!(
        GATEKEEP_AUTH_FAILURES_TOTAL,
        Unit::Count,
        "Requests rejected by bearer token authentication."
    );
    describe_gauge!(
        GATEKEEP_TRACKED_CLIENTS,
        "Number of client buckets held by the rate limiter."
    );
}

/// Install the Prometheus recorder and describe all metric families.
///
/// Idempotent: later calls are no-ops once a recorder has been installed.
pub fn init_metrics() -> eyre::Result<()> {
    if PROMETHEUS.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| eyre::eyre!("Failed to install Prometheus recorder: {e}"))?;
    // A concurrent initializer may have won the race; its handle is equivalent
    let _ = PROMETHEUS.set(handle);
    describe_metrics();

    tracing::info!("Prometheus metrics recorder installed");
    Ok(())
}

/// Prometheus text exposition, or `None` when no recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS.get().map(PrometheusHandle::render)
}

pub fn increment_request_total(route: &str, method: &str, status: u16) {
    counter!(
        GATEKEEP_REQUESTS_TOTAL,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(route: &str, method: &str, duration: Duration) {
    histogram!(
        GATEKEEP_REQUEST_DURATION_SECONDS,
        "route" => route.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// `outcome` is the backend status code, or `error` / `timeout`.
pub fn increment_backend_request_total(route: &str, method: &str, outcome: &str) {
    counter!(
        GATEKEEP_BACKEND_REQUESTS_TOTAL,
        "route" => route.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn increment_rate_limited() {
    counter!(GATEKEEP_RATE_LIMITED_TOTAL).increment(1);
}

pub fn increment_auth_failure(reason: &'static str) {
    counter!(GATEKEEP_AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn set_tracked_clients(count: usize) {
    gauge!(GATEKEEP_TRACKED_CLIENTS).set(count as f64);
}

/// RAII helper measuring backend round-trip duration.
pub struct BackendRequestTimer {
    start: Instant,
    route: String,
}

impl BackendRequestTimer {
    pub fn new(route: &str) -> Self {
        Self {
            start: Instant::now(),
            route: route.to_string(),
        }
    }
}

impl Drop for BackendRequestTimer {
    fn drop(&mut self) {
        histogram!(
            GATEKEEP_BACKEND_REQUEST_DURATION_SECONDS,
            "route" => self.route.clone()
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        increment_request_total("/orders", "GET", 200);
        record_request_duration("/orders", "GET", Duration::from_millis(3));
        increment_rate_limited();
        set_tracked_clients(4);
        drop(BackendRequestTimer::new("/orders"));
    }

    #[test]
    fn test_init_is_idempotent_and_renders() {
        init_metrics().unwrap();
        init_metrics().unwrap();

        increment_request_total("/metrics-test", "GET", 200);
        let text = render().unwrap();
        assert!(text.contains(GATEKEEP_REQUESTS_TOTAL));
    }
}
