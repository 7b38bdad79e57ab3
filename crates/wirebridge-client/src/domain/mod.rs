//! Domain layer for the client.
//!
//! Pure data: no sockets, no files, no clocks beyond `Duration` values.
//!
//! - **`config`** – runtime settings for the transport adapter and the
//!   WebSocket session, including the keepalive payload.
//! - **`session_state`** – the session lifecycle, why it ended, and the
//!   counters collected while it was open.

pub mod config;
pub mod session_state;

pub use config::{KeepalivePayload, SessionConfig, TransportConfig};
pub use session_state::{CloseReason, SessionState, SessionStats, SessionSummary};
