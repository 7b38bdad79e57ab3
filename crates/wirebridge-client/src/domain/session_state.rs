//! WebSocket session lifecycle.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//!     │                                  ▲
//!     └──────────── (failure) ───────────┘
//! ```
//!
//! - `Connecting`: the socket may be up but the HTTP Upgrade has not
//!   succeeded yet.
//! - `Open`: frames flow; the event loop is (or may be) running.
//! - `Closing`: the loop has decided to stop and is sending its close frame.
//! - `Closed`: the socket is released.  Terminal.

use std::fmt;

use wirebridge_core::protocol::frame::{CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closed) | (Open, Closing) | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why the event loop left `Open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server sent a close frame (with its status code, if any).
    PeerClosed { code: Option<u16> },
    /// The server shut the connection down without a close frame.
    PeerEof,
    /// A send or receive failed.
    Io(String),
    /// The server sent bytes the frame codec rejected.
    Protocol(String),
    /// The caller asked the loop to stop.
    Stopped,
}

impl CloseReason {
    /// Whether the socket can still carry a farewell close frame.
    pub fn socket_usable(&self) -> bool {
        matches!(
            self,
            CloseReason::PeerClosed { .. } | CloseReason::Protocol(_) | CloseReason::Stopped
        )
    }

    /// Status code the client puts in its own close frame.
    pub fn close_code(&self) -> u16 {
        match self {
            CloseReason::Protocol(_) => CLOSE_PROTOCOL_ERROR,
            _ => CLOSE_NORMAL,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed { code: Some(code) } => write!(f, "peer closed (code {code})"),
            CloseReason::PeerClosed { code: None } => f.write_str("peer closed"),
            CloseReason::PeerEof => f.write_str("peer closed the connection without a close frame"),
            CloseReason::Io(e) => write!(f, "I/O error: {e}"),
            CloseReason::Protocol(e) => write!(f, "protocol error: {e}"),
            CloseReason::Stopped => f.write_str("stopped by caller"),
        }
    }
}

/// Counters collected while the session was open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub pongs_sent: u64,
    pub keepalives_sent: u64,
}

/// Returned by the event loop once the session is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub reason: CloseReason,
    pub stats: SessionStats,
}
