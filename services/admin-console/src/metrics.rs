//! Prometheus metrics exposition
//!
//! - `console_requests_total` (counter): labels `route`, `status`
//! - `console_request_duration_seconds` (histogram): label `route`
//! - `console_refresh_total` (counter): label `outcome`
//! - `console_upstream_errors_total` (counter): label `error_type`
//!
//! Alongside the Prometheus series, [`ServiceMetrics`] keeps plain atomic
//! counters for `/health` and the shutdown drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "console_request_duration_seconds";

/// 5ms to 60s, covering the configurable upstream timeout range.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed request against its matched route template.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "console_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route.to_string()).record(duration_secs);
}

/// Record a gateway refresh with outcome `success`, `rejected`, `missing`,
/// or `error`.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("console_refresh_total", "outcome" => outcome).increment(1);
}

/// Record an upstream failure with a classification label.
pub fn record_upstream_error(error_type: &str) {
    metrics::counter!("console_upstream_errors_total", "error_type" => error_type.to_string())
        .increment(1);
}

/// Counters served by `/health`.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being handled; read when the drain times out.
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    /// Count a request as started; it stays in flight until the guard drops.
    pub fn begin(&self) -> InFlightGuard {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
