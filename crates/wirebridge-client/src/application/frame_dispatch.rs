//! Reaction to decoded WebSocket frames.
//!
//! The frame parser reports frames through callbacks.  [`FrameReactor`]
//! implements those callbacks over a mutable borrow of the session's
//! [`DispatchState`]; the borrow lasts for one `execute` call on one receive
//! buffer, so the parser never owns session state.
//!
//! Frames that need a reply (ping) or end the session (close) make the
//! reactor pause the parser and leave a [`FrameAction`] behind.  The session
//! performs it before feeding the rest of the buffer, which is what keeps a
//! pong ahead of any later frame.

use tracing::debug;
use wirebridge_core::protocol::frame::{decode_close_payload, Flow, FrameHandler, FrameHeader, OpCode};

use crate::domain::SessionStats;

/// Something the session must do before parsing resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAction {
    /// A ping arrived; answer with a pong now.
    ReplyPong,
    /// A close frame arrived; the session moves to `Closing`.
    PeerClosing { code: Option<u16> },
}

/// Session state the reactor is allowed to touch.
#[derive(Debug, Default)]
pub struct DispatchState {
    control_payload: Vec<u8>,
    pending: Option<FrameAction>,
    stats: SessionStats,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the action left by the last paused dispatch.
    pub fn take_action(&mut self) -> Option<FrameAction> {
        self.pending.take()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }
}

/// [`FrameHandler`] borrowed over a [`DispatchState`] for one dispatch.
pub struct FrameReactor<'a> {
    state: &'a mut DispatchState,
}

impl<'a> FrameReactor<'a> {
    pub fn new(state: &'a mut DispatchState) -> Self {
        Self { state }
    }
}

impl FrameHandler for FrameReactor<'_> {
    fn on_frame_header(&mut self, header: &FrameHeader) -> Flow {
        if header.opcode.is_control() {
            self.state.control_payload.clear();
        }
        Flow::Continue
    }

    fn on_frame_body(&mut self, header: &FrameHeader, chunk: &[u8]) -> Flow {
        self.state.stats.bytes_received += chunk.len() as u64;
        match header.opcode {
            // Control payloads are at most 125 bytes.
            op if op.is_control() => self.state.control_payload.extend_from_slice(chunk),
            OpCode::Text => debug!(text = %String::from_utf8_lossy(chunk), "text chunk"),
            _ => debug!(len = chunk.len(), "data chunk"),
        }
        Flow::Continue
    }

    fn on_frame_end(&mut self, header: &FrameHeader) -> Flow {
        self.state.stats.frames_received += 1;

        match header.opcode {
            OpCode::Ping => {
                debug!(len = self.state.control_payload.len(), "ping received");
                self.state.pending = Some(FrameAction::ReplyPong);
                Flow::Pause
            }
            OpCode::Close => {
                let (code, reason) = decode_close_payload(&self.state.control_payload);
                debug!(?code, %reason, "close frame received");
                self.state.pending = Some(FrameAction::PeerClosing { code });
                Flow::Pause
            }
            OpCode::Pong => {
                debug!("pong received");
                Flow::Continue
            }
            opcode => {
                debug!(?opcode, fin = header.fin, len = header.payload_len, "data frame received");
                Flow::Continue
            }
        }
    }
}
