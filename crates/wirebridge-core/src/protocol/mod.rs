//! WebSocket protocol layer: frame codec, line reader and opening handshake.

pub mod frame;
pub mod handshake;
pub mod line_reader;

pub use frame::{build_frame, frame_size, CodecError, Flow, FrameHandler, FrameHeader, FrameParser, OpCode};
pub use handshake::{check_request_fields, HandshakeError, HandshakeKey, ResponseParser, UpgradeRequest, UpgradeResponse};
pub use line_reader::{LineError, LineReader};
