//! Runtime settings for the transport adapter and WebSocket session.
//!
//! These are the `Duration`-typed values the adapters consume.  The on-disk
//! TOML schema lives in `infrastructure::config` and converts into them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wirebridge_core::protocol::frame::{OpCode, MAX_CONTROL_PAYLOAD};

/// What the session sends after a period of inbound silence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum KeepalivePayload {
    /// Application-level probe sent as a text frame.
    Text(String),
    /// Protocol-level probe sent as a ping control frame.
    Ping(Vec<u8>),
}

impl Default for KeepalivePayload {
    fn default() -> Self {
        KeepalivePayload::Text(serde_json::json!({ "type": "ping" }).to_string())
    }
}

impl KeepalivePayload {
    pub fn opcode(&self) -> OpCode {
        match self {
            KeepalivePayload::Text(_) => OpCode::Text,
            KeepalivePayload::Ping(_) => OpCode::Ping,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            KeepalivePayload::Text(text) => text.as_bytes(),
            KeepalivePayload::Ping(bytes) => bytes,
        }
    }
}

/// Settings for one WebSocket session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Inbound silence after which a keepalive is sent.
    pub idle_timeout: Duration,
    /// Upper bound on waiting for the Upgrade response.
    pub handshake_timeout: Duration,
    /// Longest single wait in the event loop, so a stop request is noticed promptly.
    pub stop_poll_interval: Duration,
    /// Size of the receive buffer handed to the socket on each read.
    pub recv_buffer_size: usize,
    /// Mask outgoing frames (RFC 6455 requires this of clients).
    pub mask_frames: bool,
    pub keepalive: KeepalivePayload,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            stop_poll_interval: Duration::from_millis(200),
            recv_buffer_size: 4096,
            mask_frames: true,
            keepalive: KeepalivePayload::default(),
        }
    }
}

impl SessionConfig {
    /// Rejects settings the event loop cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_timeout.is_zero() {
            return Err("idle timeout must be greater than zero".into());
        }
        if self.handshake_timeout.is_zero() {
            return Err("handshake timeout must be greater than zero".into());
        }
        if self.stop_poll_interval.is_zero() {
            return Err("stop poll interval must be greater than zero".into());
        }
        if self.recv_buffer_size == 0 {
            return Err("receive buffer size must be greater than zero".into());
        }
        if let KeepalivePayload::Ping(bytes) = &self.keepalive {
            if bytes.len() as u64 > MAX_CONTROL_PAYLOAD {
                return Err(format!(
                    "ping keepalive payload is {} bytes; control frames carry at most {MAX_CONTROL_PAYLOAD}",
                    bytes.len()
                ));
            }
        }
        Ok(())
    }
}

/// Settings for the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bound on each candidate address's connect attempt.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}
