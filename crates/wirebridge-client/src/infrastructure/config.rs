//! TOML-based configuration for the `wirebridge` binary.
//!
//! Example:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [transport]
//! connect_timeout_ms = 10000
//!
//! [rng]
//! allow_insecure_fallback = false
//!
//! [websocket]
//! host = "127.0.0.1"
//! port = 80
//! path = "/"
//! idle_timeout_secs = 5
//! handshake_timeout_secs = 10
//! stop_poll_interval_ms = 200
//! recv_buffer_size = 4096
//! mask_frames = true
//!
//! [websocket.keepalive]
//! kind = "text"
//! payload = '{"type":"ping"}'
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so a missing file, a
//! missing section or a missing key all fall back to the built-in values.
//! Durations are stored as plain integers with the unit in the key name and
//! converted to `Duration` by [`AppConfig::session_config`] and friends.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{KeepalivePayload, SessionConfig, TransportConfig};
use crate::infrastructure::rng::FallbackPolicy;
use crate::infrastructure::websocket::SessionTarget;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The values parsed but cannot be used together.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub rng: RngSection,
    #[serde(default)]
    pub websocket: WebSocketSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSection {
    /// Per-candidate connect timeout.  `0` uses the OS default.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RngSection {
    /// Permit the non-cryptographic fallback when OS entropy fails.
    #[serde(default)]
    pub allow_insecure_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSocketSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    /// Sent as `Authorization: Bearer <token>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_stop_poll_interval_ms")]
    pub stop_poll_interval_ms: u64,
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    #[serde(default = "default_true")]
    pub mask_frames: bool,
    #[serde(default)]
    pub keepalive: KeepalivePayload,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    80
}
fn default_path() -> String {
    "/".to_string()
}
fn default_idle_timeout_secs() -> u64 {
    5
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_stop_poll_interval_ms() -> u64 {
    200
}
fn default_recv_buffer_size() -> usize {
    4096
}
fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            bearer_token: None,
            idle_timeout_secs: default_idle_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            stop_poll_interval_ms: default_stop_poll_interval_ms(),
            recv_buffer_size: default_recv_buffer_size(),
            mask_frames: default_true(),
            keepalive: KeepalivePayload::default(),
        }
    }
}

// ── Conversion into runtime settings ──────────────────────────────────────────

impl AppConfig {
    /// Session settings, validated.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when a value is unusable (zero timeout, zero
    /// buffer, oversized ping payload).
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let ws = &self.websocket;
        let config = SessionConfig {
            idle_timeout: Duration::from_secs(ws.idle_timeout_secs),
            handshake_timeout: Duration::from_secs(ws.handshake_timeout_secs),
            stop_poll_interval: Duration::from_millis(ws.stop_poll_interval_ms),
            recv_buffer_size: ws.recv_buffer_size,
            mask_frames: ws.mask_frames,
            keepalive: ws.keepalive.clone(),
        };
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
        }
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        if self.rng.allow_insecure_fallback {
            FallbackPolicy::AllowInsecure
        } else {
            FallbackPolicy::Deny
        }
    }

    /// Where the WebSocket session connects.
    pub fn session_target(&self) -> SessionTarget {
        let ws = &self.websocket;
        let target = SessionTarget::new(ws.host.clone(), ws.port, ws.path.clone());
        match &ws.bearer_token {
            Some(token) => target.with_bearer_token(token.clone()),
            None => target,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
