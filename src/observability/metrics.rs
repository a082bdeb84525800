//! Metrics collection and exposition.
//!
//! # Metrics
//! - `exchange_connections_accepted_total` (counter)
//! - `exchange_connections_rejected_total` (counter): refused at admission
//! - `exchange_active_workers` (gauge)
//! - `exchange_documents_total` (counter): by `mode` and `outcome`
//! - `exchange_sends_total` (counter): by `outcome` and `connection` (new/reused)
//! - `exchange_send_duration_seconds` (histogram)
//! - `exchange_listener_failures_total` (counter): fatal accept errors

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint"),
    }
}

pub fn record_accepted() {
    counter!("exchange_connections_accepted_total").increment(1);
}

pub fn record_rejected() {
    counter!("exchange_connections_rejected_total").increment(1);
}

pub fn record_listener_failure() {
    counter!("exchange_listener_failures_total").increment(1);
}

pub fn worker_started() {
    gauge!("exchange_active_workers").increment(1.0);
}

pub fn worker_finished() {
    gauge!("exchange_active_workers").decrement(1.0);
}

/// `mode` is "immediate" or "deferred"; `outcome` is "delivered", "sink_error" or "protocol_error".
pub fn record_document(mode: &'static str, outcome: &'static str) {
    counter!("exchange_documents_total", "mode" => mode, "outcome" => outcome).increment(1);
}

pub fn record_send(outcome: &'static str, reused: bool, start: Instant) {
    let connection = if reused { "reused" } else { "new" };
    counter!("exchange_sends_total", "outcome" => outcome, "connection" => connection).increment(1);
    histogram!("exchange_send_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}
