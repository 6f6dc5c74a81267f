//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): proxied HTTP calls by service, method, status
//! - `gateway_request_duration_seconds` (histogram): time to response headers
//! - `gateway_upstream_errors_total` (counter): backend calls that failed outright
//! - `gateway_ws_sessions_active` (gauge): live relay sessions
//! - `gateway_ws_frames_total` (counter): relayed frames by direction
//! - `gateway_probe_attempts_total` (counter): reachability probe attempts by outcome
//!
//! All recorders are no-ops until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, method: &str, status: u16, start: Instant) {
    let labels = [
        ("service", service.to_owned()),
        ("method", method.to_owned()),
        ("status", status.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(service: &str) {
    counter!("gateway_upstream_errors_total", "service" => service.to_owned()).increment(1);
}

pub fn ws_session_opened() {
    gauge!("gateway_ws_sessions_active").increment(1.0);
}

pub fn ws_session_closed() {
    gauge!("gateway_ws_sessions_active").decrement(1.0);
}

pub fn record_ws_frame(direction: &'static str) {
    counter!("gateway_ws_frames_total", "direction" => direction).increment(1);
}

pub fn record_probe_attempt(outcome: &'static str) {
    counter!("gateway_probe_attempts_total", "outcome" => outcome).increment(1);
}
