//! Startup configuration for the `tern` binary.
//!
//! A TOML file with optional `[codec]`, `[limits]` and `[metrics]` tables.
//! Every key is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tern_codec::SerializerKind;

/// Everything the `tern` binary reads at startup.
///
/// Missing keys fall back to [`Default`], which consults `TERN_HOST` and
/// `TERN_PORT` before the built-in address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub codec: CodecConfig,
    pub limits: LimitsConfig,
    pub metrics: MetricsConfig,
}

/// `[codec]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Body encoding, `msgpack` or `json`. Clients must use the same.
    pub serializer: String,
}

/// `[limits]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Connections served at once; further accepts are dropped.
    pub max_connections: usize,
}

/// `[metrics]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve a Prometheus scrape endpoint.
    pub enabled: bool,
    pub port: u16,
}

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8082;

impl Default for Config {
    fn default() -> Self {
        let host = std::env::var("TERN_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = std::env::var("TERN_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self {
            host,
            port,
            codec: CodecConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            serializer: SerializerKind::default().to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl CodecConfig {
    /// Resolve the configured serializer.
    ///
    /// # Errors
    ///
    /// Returns an error if the name matches no serializer.
    pub fn serializer(&self) -> Result<SerializerKind> {
        self.serializer
            .parse()
            .with_context(|| format!("Invalid codec.serializer: {}", self.serializer))
    }
}

/// Files consulted by [`Config::load`], first match wins.
const SEARCH_PATH: [&str; 3] = ["tern.toml", "/etc/tern/tern.toml", "~/.config/tern/tern.toml"];

impl Config {
    /// Read the first file on the search path, or use defaults if none
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is found but is not a valid config.
    pub fn load() -> Result<Self> {
        let found = SEARCH_PATH
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        match found {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Read and validate one config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, is not TOML of the
    /// expected shape, or names an unknown serializer.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("Malformed config {}", path.display()))?;
        config.codec.serializer()?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Address the RPC listener binds.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
