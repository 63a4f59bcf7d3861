//! Metrics collection and exposition.
//!
//! # Metrics
//! - `phantom_connections_accepted_total` (counter): sockets returned by accept
//! - `phantom_connections_rejected_total` (counter): sockets dropped, by `reason`
//! - `phantom_active_connections` (gauge): connections with running tasks
//! - `phantom_packets_received_total` (counter): frames parsed by read tasks
//! - `phantom_packets_sent_total` (counter): messages written by write tasks
//!
//! Recording is a no-op until a recorder is installed, so library users who
//! never call [`init_metrics`] pay only for the facade lookups.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn connection_accepted() {
    ::metrics::counter!("phantom_connections_accepted_total").increment(1);
}

/// `reason` is a short label such as `keepalive` or `refused`.
pub fn connection_rejected(reason: &'static str) {
    ::metrics::counter!("phantom_connections_rejected_total", "reason" => reason).increment(1);
}

pub fn connection_opened() {
    ::metrics::gauge!("phantom_active_connections").increment(1.0);
}

pub fn connection_closed() {
    ::metrics::gauge!("phantom_active_connections").decrement(1.0);
}

pub fn packet_received() {
    ::metrics::counter!("phantom_packets_received_total").increment(1);
}

pub fn packet_sent() {
    ::metrics::counter!("phantom_packets_sent_total").increment(1);
}
