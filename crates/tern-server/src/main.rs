//! # Tern Server
//!
//! Standalone RPC server hosting the `Arith` service.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tern
//!
//! # Run with custom config
//! tern --config /path/to/tern.toml
//!
//! # Run with environment variables
//! TERN_PORT=9000 TERN_HOST=0.0.0.0 tern
//! ```
//!
//! Without `--config`, a `tern.toml` in the working directory,
//! `/etc/tern/tern.toml` or `~/.config/tern/tern.toml` overrides the
//! defaults.

mod config;
mod handlers;
mod metrics;
mod service;

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tern=debug,tern_rpc=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match config_path(std::env::args().skip(1))? {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!(
        host = %config.host,
        port = config.port,
        max_connections = config.limits.max_connections,
        "Starting tern"
    );

    metrics::init_metrics();
    handlers::run_server(config).await
}

/// Extract the value of `--config` from the command line.
fn config_path(mut args: impl Iterator<Item = String>) -> Result<Option<String>> {
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(value) => path = Some(value),
                None => bail!("--config requires a path"),
            },
            other => match other.strip_prefix("--config=") {
                Some(value) => path = Some(value.to_string()),
                None => bail!("Unknown argument: {}", other),
            },
        }
    }
    Ok(path)
}
