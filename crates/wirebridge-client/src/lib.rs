//! wirebridge-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does wirebridge-client do? (for beginners)
//!
//! `wirebridge-core` describes *what* travels over the wire.  This crate owns
//! the things that touch the operating system:
//!
//! 1. The **RNG adapter** answers a secure-channel engine's "give me random
//!    bytes" callback from the OS entropy source.
//! 2. The **transport adapter** owns one TCP socket and answers the engine's
//!    send/recv callbacks without ever blocking on readiness; "not ready"
//!    comes back as a want-read / want-write retry sentinel.
//! 3. The **WebSocket session** opens its own plain socket, performs the
//!    HTTP Upgrade, then runs a single-threaded event loop that answers
//!    pings, sends keepalives when the line goes quiet, and closes cleanly.
//!
//! Layering follows the usual rule: `domain` has no I/O, `application`
//! reacts to decoded frames, `infrastructure` owns sockets and files.

/// Domain layer: session configuration, state machine and statistics.
pub mod domain;

/// Application layer: reaction to decoded WebSocket frames.
pub mod application;

/// Infrastructure layer: RNG and transport adapters, WebSocket session, config file.
pub mod infrastructure;
