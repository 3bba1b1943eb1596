//! Connection handling for the tern server.
//!
//! The accept loop lives in [`TcpServer::serve_until`]; this module feeds it
//! the configured limits and counts connections into the metrics.

use crate::config::Config;
use crate::metrics::{self, ConnectionGauge};
use crate::service;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tern_rpc::{ConnectionHook, Options, TcpServer};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Records accepted and rejected connections.
struct ConnectionMetrics;

impl ConnectionHook for ConnectionMetrics {
    type Guard = ConnectionGauge;

    fn accepted(&self, _peer: SocketAddr) -> ConnectionGauge {
        ConnectionGauge::open()
    }

    fn rejected(&self, _peer: SocketAddr) {
        metrics::record_rejected();
    }
}

/// Run the RPC server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the listener cannot
/// be bound.
pub async fn run_server(config: Config) -> Result<()> {
    let serializer = config.codec.serializer()?;

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!(error = %e, "Metrics disabled");
        }
    }

    let server = TcpServer::new();
    service::register(&server);
    let server = Arc::new(server);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(%addr, methods = ?server.methods(), serializer = %serializer, "Listening");

    let options = Options::default()
        .with_serializer(serializer)
        .with_max_connections(config.limits.max_connections);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
        }
        info!("Shutting down");
    };
    server
        .serve_until(listener, options, ConnectionMetrics, shutdown)
        .await;
    Ok(())
}
