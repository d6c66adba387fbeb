//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): proxied requests by method, status
//! - `proxy_request_duration_seconds` (histogram): time until the response was handed to the client
//! - `proxy_cold_start_wait_seconds` (histogram): time spent waiting on 502/503/530
//! - `proxy_backend_control_calls_total` (counter): start/stop calls by outcome
//! - `proxy_websocket_sessions_active` (gauge): open relay sessions
//! - `proxy_websocket_messages_total` (counter): relayed messages by direction
//!
//! Without an installed recorder every call is a no-op, so components record
//! unconditionally and only the binary decides whether to export.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_cold_start_wait(waited: Duration) {
    metrics::histogram!("proxy_cold_start_wait_seconds").record(waited.as_secs_f64());
}

pub fn record_control_call(action: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "proxy_backend_control_calls_total",
        "action" => action,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn websocket_session_opened() {
    metrics::gauge!("proxy_websocket_sessions_active").increment(1.0);
}

pub fn websocket_session_closed() {
    metrics::gauge!("proxy_websocket_sessions_active").decrement(1.0);
}

pub fn record_websocket_message(direction: &'static str) {
    metrics::counter!("proxy_websocket_messages_total", "direction" => direction).increment(1);
}
