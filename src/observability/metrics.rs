//! Metrics collection and exposition.
//!
//! # Metrics
//! - `graceful_exit_open_connections` (gauge): current connection count
//! - `graceful_exit_connections_total` (counter): accepted connections
//! - `graceful_exit_forced_closes_total` (counter): connections destroyed at the deadline
//! - `graceful_exit_rejected_requests_total` (counter): requests refused, by phase
//! - `graceful_exit_final_requests_total` (counter): last requests admitted while draining
//! - `graceful_exit_phase` (gauge): 0=running, 1=draining, 2=forcing, 3=exiting

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::lifecycle::LifecyclePhase;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_opened(open: usize) {
    counter!("graceful_exit_connections_total").increment(1);
    gauge!("graceful_exit_open_connections").set(open as f64);
}

pub fn record_connection_closed(open: usize) {
    gauge!("graceful_exit_open_connections").set(open as f64);
}

pub fn record_forced_close() {
    counter!("graceful_exit_forced_closes_total").increment(1);
}

pub fn record_rejected(phase: LifecyclePhase) {
    counter!("graceful_exit_rejected_requests_total", "phase" => phase.as_str()).increment(1);
}

pub fn record_final_request() {
    counter!("graceful_exit_final_requests_total").increment(1);
}

pub fn record_phase(phase: LifecyclePhase) {
    gauge!("graceful_exit_phase").set(phase as u8 as f64);
}
