//! Prometheus metrics for the request pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so tests and embedders can call them freely.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_requests_total` - Responses sent (label: status_class `2xx`..`5xx`)
//! - `gateway_rate_limited_total` - Requests rejected by the rate limiter
//! - `gateway_failures_total` - Failures rendered by the error handler (label: kind)
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - Pipeline time per request
//!
//! ## Gauges
//! - `gateway_rate_limit_entries` - Client windows held by the rate limit store

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::http::StatusCode;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
    pub const FAILURES_TOTAL: &str = "gateway_failures_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const RATE_LIMIT_ENTRIES: &str = "gateway_rate_limit_entries";
}

/// Install the Prometheus exporter and describe every metric.
///
/// # Errors
///
/// Fails if the listener cannot be bound or a recorder is already installed.
pub fn init_metrics(metrics_addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of responses sent");
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::FAILURES_TOTAL,
        "Total number of failures rendered by the error handler"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Time spent in the request pipeline in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_ENTRIES,
        "Client windows currently held by the rate limit store"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// `"2xx"`, `"4xx"`, ... for a status code.
pub fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record one finished request.
pub fn record_request(status: StatusCode, elapsed: Duration) {
    counter!(names::REQUESTS_TOTAL, "status_class" => status_class(status)).increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record a failure by its machine-readable kind.
pub fn record_failure(kind: &'static str) {
    counter!(names::FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub fn set_rate_limit_entries(count: usize) {
    gauge!(names::RATE_LIMIT_ENTRIES).set(count as f64);
}
