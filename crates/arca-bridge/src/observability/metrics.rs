//! Metrics definitions for the ARCA bridge.
//!
//! All metrics follow Prometheus naming conventions:
//! - `arca_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and serve `/metrics` on `bind_address`.
///
/// Must be called from within the Tokio runtime, before any metric is
/// recorded. Query buckets span a fast cached-ticket call up to a WSAA
/// refresh followed by a slow WSFE response.
///
/// # Errors
///
/// Returns error if the buckets are rejected or the recorder cannot be
/// installed (e.g., already installed, address in use).
pub fn init_metrics_recorder(bind_address: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(bind_address)
        .set_buckets_for_metric(
            Matcher::Prefix("arca_query".to_string()),
            &[
                0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 20.000,
            ],
        )
        .map_err(|e| format!("Failed to set query duration buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Record a WSAA ticket request.
///
/// Metric: `arca_ticket_refresh_total`
/// Labels: `status` (success, already_valid, rejected, error)
pub fn record_ticket_refresh(status: &'static str) {
    counter!("arca_ticket_refresh_total", "status" => status).increment(1);
}

/// Record a processed request.
///
/// Metrics: `arca_queries_total`, `arca_query_duration_seconds`
/// Labels: `outcome`
pub fn record_query(outcome: &'static str, duration: Duration) {
    counter!("arca_queries_total", "outcome" => outcome).increment(1);
    histogram!("arca_query_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record a reply publish attempt.
///
/// Metric: `arca_reply_publish_total`
/// Labels: `status` (success, error, skipped)
pub fn record_reply_publish(status: &'static str) {
    counter!("arca_reply_publish_total", "status" => status).increment(1);
}
