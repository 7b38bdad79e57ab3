//! WebSocket opening handshake (RFC 6455 §4).
//!
//! # How the Upgrade works (for beginners)
//!
//! A WebSocket starts life as an ordinary HTTP/1.1 request on a TCP socket:
//!
//! ```text
//! GET /stream HTTP/1.1
//! Host: example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//!
//! ```
//!
//! A willing server answers `101 Switching Protocols` and proves it read our
//! key by returning `Sec-WebSocket-Accept`, a SHA-1 digest of the key and a
//! fixed GUID.  From then on the same socket carries WebSocket frames.
//!
//! The key is 16 random bytes, base64-encoded.  The randomness comes from the
//! caller (see [`HandshakeKey::from_nonce`]) so this module stays free of any
//! entropy source.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::debug;
use tungstenite::handshake::derive_accept_key;

/// The only protocol version this client speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// Status code a server must answer with to accept the upgrade.
pub const SWITCHING_PROTOCOLS: u16 = 101;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// Status line or header block could not be parsed.
    #[error("invalid handshake response: {0}")]
    InvalidResponse(String),

    /// The server answered with something other than 101.
    #[error("server rejected the upgrade with status {status}")]
    HandshakeRejected { status: u16 },

    #[error("response is missing Sec-WebSocket-Accept")]
    MissingAcceptKey,

    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptKeyMismatch { expected: String, actual: String },

    /// A request field would not fit on its own line of the request head.
    #[error("invalid handshake request: {0}")]
    InvalidRequest(String),
}

// ── Key ───────────────────────────────────────────────────────────────────────

/// The `Sec-WebSocket-Key` sent with an Upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeKey {
    encoded: String,
}

impl HandshakeKey {
    /// Encodes 16 random bytes as a handshake key.
    pub fn from_nonce(nonce: [u8; 16]) -> Self {
        Self {
            encoded: STANDARD.encode(nonce),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// The `Sec-WebSocket-Accept` value a conforming server returns.
    pub fn expected_accept(&self) -> String {
        derive_accept_key(self.encoded.as_bytes())
    }

    /// Checks a server's `Sec-WebSocket-Accept` value against this key.
    pub fn verify(&self, accept: &str) -> Result<(), HandshakeError> {
        let expected = self.expected_accept();
        if accept.trim() == expected {
            Ok(())
        } else {
            Err(HandshakeError::AcceptKeyMismatch {
                expected,
                actual: accept.trim().to_owned(),
            })
        }
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// Checks the caller-supplied parts of an Upgrade request.
///
/// No field may carry a control character.  `host` and `path` may not carry
/// whitespace either, since both end up inside a single request token.
pub fn check_request_fields(host: &str, path: &str, bearer_token: Option<&str>) -> Result<(), HandshakeError> {
    check_field("host", host, false)?;
    check_field("path", path, false)?;
    if let Some(token) = bearer_token {
        check_field("bearer token", token, true)?;
    }
    Ok(())
}

fn check_field(name: &str, value: &str, spaces_allowed: bool) -> Result<(), HandshakeError> {
    match value
        .chars()
        .find(|&c| c.is_control() || (!spaces_allowed && c.is_whitespace()))
    {
        Some(c) => Err(HandshakeError::InvalidRequest(format!("{name} contains {c:?}"))),
        None => Ok(()),
    }
}

/// Builder for the client's Upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    host: String,
    path: String,
    key: HandshakeKey,
    bearer_token: Option<String>,
}

impl UpgradeRequest {
    /// `host` is the literal `Host` header value (include `:port` when needed).
    /// An empty `path` is sent as `/`.
    pub fn new(host: impl Into<String>, path: impl Into<String>, key: HandshakeKey) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            key,
            bearer_token: None,
        }
    }

    /// Adds `Authorization: Bearer <token>` to the request.
    pub fn with_bearer_token(mut self, token: Option<impl Into<String>>) -> Self {
        self.bearer_token = token.map(Into::into);
        self
    }

    pub fn key(&self) -> &HandshakeKey {
        &self.key
    }

    /// See [`check_request_fields`].
    pub fn validate(&self) -> Result<(), HandshakeError> {
        check_request_fields(&self.host, &self.path, self.bearer_token.as_deref())
    }

    /// Serialises the request, terminated by the blank line.  Call
    /// [`validate`](Self::validate) first when the fields come from outside.
    pub fn to_bytes(&self) -> Vec<u8> {
        let path = if self.path.is_empty() { "/" } else { &self.path };

        let mut req = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n",
            host = self.host,
            key = self.key.as_str(),
        );
        if let Some(token) = &self.bearer_token {
            req.push_str("Authorization: Bearer ");
            req.push_str(token);
            req.push_str("\r\n");
        }
        req.push_str("\r\n");
        req.into_bytes()
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// A parsed response head: status line plus headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeResponse {
    pub status: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
}

impl UpgradeResponse {
    /// Parses `HTTP/1.x <code> [reason]`.
    pub fn from_status_line(line: &str) -> Result<Self, HandshakeError> {
        let invalid = || HandshakeError::InvalidResponse(format!("bad status line: {line:?}"));

        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(invalid());
        }
        let status = parts
            .next()
            .filter(|code| code.len() == 3)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(invalid)?;
        let reason = parts.next().unwrap_or_default().trim().to_owned();

        Ok(Self {
            status,
            reason,
            headers: Vec::new(),
        })
    }

    /// Adds one `Name: value` header line.
    pub fn push_header_line(&mut self, line: &str) -> Result<(), HandshakeError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HandshakeError::InvalidResponse(format!("bad header line: {line:?}")))?;
        self.headers
            .push((name.trim().to_owned(), value.trim().to_owned()));
        Ok(())
    }

    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Checks that this response accepts the upgrade requested with `key`.
    pub fn validate(&self, key: &HandshakeKey) -> Result<(), HandshakeError> {
        if self.status != SWITCHING_PROTOCOLS {
            return Err(HandshakeError::HandshakeRejected {
                status: self.status,
            });
        }

        let upgrade_ok = self
            .header("Upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        if !upgrade_ok {
            return Err(HandshakeError::InvalidResponse(
                "missing `Upgrade: websocket` header".into(),
            ));
        }

        let connection_ok = self.header("Connection").is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        if !connection_ok {
            return Err(HandshakeError::InvalidResponse(
                "missing `Connection: Upgrade` header".into(),
            ));
        }

        let accept = self
            .header("Sec-WebSocket-Accept")
            .ok_or(HandshakeError::MissingAcceptKey)?;
        key.verify(accept)
    }
}

/// Assembles an [`UpgradeResponse`] from lines produced by a line reader.
#[derive(Debug, Default)]
pub struct ResponseParser {
    head: Option<UpgradeResponse>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line.  Returns the complete response once the blank line
    /// ending the header section arrives.
    pub fn push_line(&mut self, line: &str) -> Result<Option<UpgradeResponse>, HandshakeError> {
        match self.head.as_mut() {
            None => {
                self.head = Some(UpgradeResponse::from_status_line(line)?);
                Ok(None)
            }
            Some(_) if line.is_empty() => Ok(self.head.take()),
            Some(head) => match head.push_header_line(line) {
                Ok(()) => Ok(None),
                // A refusal is reported by status; its header block is not inspected.
                Err(_) if head.status != SWITCHING_PROTOCOLS => {
                    debug!(status = head.status, line, "skipping unparseable header line");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        }
    }
}
