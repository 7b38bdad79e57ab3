//! # wirebridge-core
//!
//! Shared library for wirebridge containing the secure-channel engine
//! contract and the WebSocket protocol layer (frame codec, line reader and
//! opening handshake).
//!
//! This crate has zero dependencies on network sockets or OS entropy.  The
//! adapters that own real sockets and read the OS random source live in
//! `wirebridge-client`.
//!
//! # Architecture overview (for beginners)
//!
//! wirebridge connects a client process to a remote service over two
//! independent paths:
//!
//! - An **encrypted stream**: a pluggable secure-channel engine (a TLS
//!   implementation, for example) drives its own handshake and record layer.
//!   It never touches sockets itself.  Instead it calls back into a transport
//!   adapter for raw bytes and into an RNG adapter for random bytes.
//!
//! - A **WebSocket session** on a plain socket: an HTTP Upgrade request
//!   promotes the TCP connection, then a single-threaded event loop decodes
//!   frames, answers pings and sends keepalives.
//!
//! This crate defines:
//!
//! - **`engine`** – The callback contract the secure-channel engine expects:
//!   the [`IoProgress`] vocabulary (bytes transferred, want-read, want-write),
//!   the error taxonomy, the [`BioTransport`] and [`RandomSource`] traits, the
//!   call-site retry loops, and the engine delay timer.
//!
//! - **`protocol`** – How WebSocket bytes travel over the network: frame
//!   encoding and a callback-driven incremental frame parser, a growable
//!   line reader for the HTTP response, and the Upgrade request/response.

// Declare the two top-level modules.  Rust will look for each in a
// subdirectory with the same name (e.g., src/engine/mod.rs).
pub mod engine;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `wirebridge_core::IoProgress` instead of `wirebridge_core::engine::IoProgress`.
pub use engine::{BioTransport, IoProgress, RandomSource, RngError, TransportError};
pub use protocol::frame::{build_frame, frame_size, CodecError, Flow, FrameHandler, FrameHeader, FrameParser, OpCode};
pub use protocol::handshake::{check_request_fields, HandshakeError, HandshakeKey, ResponseParser, UpgradeRequest, UpgradeResponse};
pub use protocol::line_reader::{LineError, LineReader};
