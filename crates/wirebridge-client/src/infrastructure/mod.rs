//! Infrastructure layer for the client.
//!
//! Everything here touches the operating system: sockets, the entropy
//! source, the wall clock and the config file.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `wirebridge_core`, but MUST NOT be imported by them.
//!
//! # Sub-modules
//!
//! - **`rng`** – `RngAdapter`, the engine's random-byte callback backed by the
//!   OS CSPRNG, with an opt-in and loudly logged non-cryptographic fallback.
//!
//! - **`transport`** – `TransportAdapter`, one non-blocking TCP socket behind
//!   the engine's send/recv callbacks.  Also hosts the resolve / connect-first
//!   helpers shared with the WebSocket session.
//!
//! - **`websocket`** – `WebSocketSession`: connect, HTTP Upgrade handshake,
//!   the ping/keepalive event loop and close.
//!
//! - **`config`** – TOML persistence of all of the above settings.

pub mod config;
pub mod rng;
pub mod transport;
pub mod websocket;
