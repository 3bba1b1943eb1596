//! Prometheus instrumentation for the tern server.
//!
//! Everything here is a thin wrapper over the `metrics` facade. Without an
//! installed exporter the recording calls are no-ops.

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tern_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tern_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "tern_connections_rejected_total";
    pub const CALLS_TOTAL: &str = "tern_calls_total";
    pub const CALL_ERRORS_TOTAL: &str = "tern_call_errors_total";
    pub const CALL_LATENCY_SECONDS: &str = "tern_call_latency_seconds";
}

/// Register descriptions for every tern metric.
pub fn init_metrics() {
    describe_counter!(names::CONNECTIONS_TOTAL, "Connections accepted since start");
    describe_gauge!(names::CONNECTIONS_ACTIVE, "Connections being served");
    describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections dropped at the connection limit"
    );
    describe_counter!(names::CALLS_TOTAL, "Calls answered, by method");
    describe_counter!(names::CALL_ERRORS_TOTAL, "Calls answered with an error, by method");
    describe_histogram!(
        names::CALL_LATENCY_SECONDS,
        Unit::Seconds,
        "Time spent in the handler, by method"
    );
}

/// Install the Prometheus exporter with a scrape endpoint on `port`.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed or its listener
/// cannot be bound.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Cannot start metrics exporter on {}", addr))?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Count a connection turned away at the limit.
pub fn record_rejected() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Count one answered call and its handler latency.
pub fn record_call(method: &'static str, seconds: f64, ok: bool) {
    counter!(names::CALLS_TOTAL, "method" => method).increment(1);
    if !ok {
        counter!(names::CALL_ERRORS_TOTAL, "method" => method).increment(1);
    }
    histogram!(names::CALL_LATENCY_SECONDS, "method" => method).record(seconds);
}

/// Holds one slot of the active-connections gauge for as long as it lives.
pub struct ConnectionGauge(());

impl ConnectionGauge {
    /// Count a newly accepted connection.
    #[must_use]
    pub fn open() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        let gauge = ConnectionGauge::open();
        record_call("Arith.Add", 0.001, true);
        record_call("Arith.Div", 0.002, false);
        record_rejected();
        drop(gauge);
    }
}
