//! Server configuration.
//!
//! Values are layered, lowest priority first:
//! 1. Compiled defaults ([`ServerConfig::default()`])
//! 2. An optional JSON file
//! 3. `CHORUS_*` environment variables
//!
//! The binary applies its CLI flags on top of the loaded value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;

/// Prefix for environment overrides (`CHORUS_PORT`, `CHORUS_WS_PATH`, ...).
pub const ENV_PREFIX: &str = "CHORUS_";

/// Paths owned by the server itself; the WebSocket route may not shadow them.
const RESERVED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Configuration for the Chorus server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `8080`, `0` for auto-assign).
    pub port: u16,
    /// Path that upgrades to the broadcast WebSocket.
    pub ws_path: String,
    /// Client page served for every other path.
    pub index_path: PathBuf,
    /// Accept upgrade requests from any `Origin`.
    ///
    /// This is a security-relevant relaxation meant for local or demo use.
    /// When `false`, only same-host origins and `allowed_origins` pass.
    pub allow_any_origin: bool,
    /// Extra origins accepted when `allow_any_origin` is off.
    pub allowed_origins: Vec<String>,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Read buffer size for the upgraded socket.
    pub read_buffer_size: usize,
    /// Write buffer size for the upgraded socket.
    pub write_buffer_size: usize,
    /// Per-recipient send timeout during a broadcast, in milliseconds.
    /// `None` waits indefinitely.
    pub send_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            ws_path: "/ws".into(),
            index_path: PathBuf::from("static/index.html"),
            allow_any_origin: true,
            allowed_origins: Vec::new(),
            max_message_size: 64 * 1024 * 1024, // 64 MB
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            send_timeout_ms: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from defaults, an optional JSON file, and the
    /// environment.
    ///
    /// A `path` that does not exist is an error: the caller asked for it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::InvalidValue(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            debug!(?path, "loading config file");
            figment = figment.merge(Json::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extract and validate a configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot be served.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "ws_path must start with '/': {}",
                self.ws_path
            )));
        }
        if RESERVED_PATHS.contains(&self.ws_path.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "ws_path conflicts with a built-in route: {}",
                self.ws_path
            )));
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(ConfigError::InvalidValue(
                "socket buffer sizes must be non-zero".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_message_size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Send timeout as a `Duration`, if configured.
    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    /// `host:port` as a display string.
    pub fn bind_addr(&self) -> String {
        crate::errors::display_addr(&self.host, self.port)
    }
}
