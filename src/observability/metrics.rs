//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define tunnel metrics (frames, dials, keepalive, drops)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `tunnel_dials_total` (counter): dial attempts by outcome
//! - `tunnel_sessions_total` (counter): finished sessions by end reason
//! - `tunnel_frames_received_total` (counter): request frames read
//! - `tunnel_responses_written_total` (counter): response frames written
//! - `tunnel_synthesized_responses_total` (counter): local error replies by status
//! - `tunnel_dropped_responses_total` (counter): requests lost, by reason
//! - `tunnel_keepalive_timeouts_total` (counter): sessions closed for silence
//! - `tunnel_connected` (gauge): 1 while a session is serving
//!
//! # Design Decisions
//! - Exporter is optional; without it every call is a no-op

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_dial(outcome: &'static str) {
    metrics::counter!("tunnel_dials_total", "outcome" => outcome).increment(1);
}

pub fn record_session_end(reason: &'static str) {
    metrics::counter!("tunnel_sessions_total", "reason" => reason).increment(1);
}

pub fn record_frame_received() {
    metrics::counter!("tunnel_frames_received_total").increment(1);
}

pub fn record_response_written() {
    metrics::counter!("tunnel_responses_written_total").increment(1);
}

pub fn record_synthesized(status: u16) {
    metrics::counter!("tunnel_synthesized_responses_total", "status" => status.to_string())
        .increment(1);
}

/// Reasons: `panic`, `oversized`, `write_failed`.
pub fn record_dropped(reason: &'static str) {
    metrics::counter!("tunnel_dropped_responses_total", "reason" => reason).increment(1);
}

pub fn record_keepalive_timeout() {
    metrics::counter!("tunnel_keepalive_timeouts_total").increment(1);
}

pub fn record_connected(connected: bool) {
    metrics::gauge!("tunnel_connected").set(if connected { 1.0 } else { 0.0 });
}
