//! WebSocket frame codec (RFC 6455 §5).
//!
//! Wire format:
//! ```text
//! [FIN:1][RSV:3][opcode:4][MASK:1][len:7][ext len:0/2/8][mask key:0/4][payload:N]
//! ```
//! Extended lengths are big-endian.  `len` 126 means a 16-bit extended
//! length follows, 127 a 64-bit one.
//!
//! Encoding is a pair of plain functions ([`frame_size`], [`build_frame`]).
//! Decoding is incremental: [`FrameParser::execute`] accepts whatever bytes
//! the socket produced and reports frames through [`FrameHandler`]
//! callbacks, so a frame split across many reads is never buffered whole.

use thiserror::Error;
use tracing::trace;

/// Largest payload a control frame (close, ping, pong) may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

/// Close status: normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close status: protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Longest possible frame header (2 + 8 extended length + 4 mask key).
const MAX_HEADER_LEN: usize = 14;

/// Errors detected while decoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The opcode nibble is one of the reserved values.
    #[error("unknown opcode: 0x{0:X}")]
    UnknownOpcode(u8),

    /// RSV bits are set but no extension was negotiated.
    #[error("reserved bits set without a negotiated extension: 0b{0:03b}")]
    ReservedBits(u8),

    /// A control frame arrived without the FIN bit.
    #[error("control frame {0:?} is fragmented")]
    FragmentedControl(OpCode),

    /// A control frame declared more than 125 payload bytes.
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLarge(u64),

    /// A 64-bit extended length had its most significant bit set.
    #[error("invalid 64-bit payload length: {0}")]
    InvalidLength(u64),
}

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Control frames are close, ping and pong.
    pub fn is_control(self) -> bool {
        (self as u8) & 0x08 != 0
    }
}

impl TryFrom<u8> for OpCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Number of extended-length bytes needed for `payload_len`.
fn extended_len_size(payload_len: usize) -> usize {
    if payload_len < 126 {
        0
    } else if payload_len <= u16::MAX as usize {
        2
    } else {
        8
    }
}

/// Returns the encoded size of a frame carrying `payload_len` bytes.
///
/// # Examples
///
/// ```rust
/// use wirebridge_core::protocol::frame::frame_size;
///
/// assert_eq!(frame_size(0, false), 2);
/// assert_eq!(frame_size(5, true), 2 + 4 + 5);
/// assert_eq!(frame_size(300, false), 2 + 2 + 300);
/// ```
pub fn frame_size(payload_len: usize, masked: bool) -> usize {
    let mask_len = if masked { 4 } else { 0 };
    2 + extended_len_size(payload_len) + mask_len + payload_len
}

/// Encodes one frame.  When `mask` is present the payload is masked with it
/// and the MASK bit is set, as RFC 6455 requires for client-to-server frames.
///
/// # Examples
///
/// ```rust
/// use wirebridge_core::protocol::frame::{build_frame, OpCode};
///
/// let pong = build_frame(OpCode::Pong, true, None, &[]);
/// assert_eq!(pong, vec![0x8A, 0x00]);
/// ```
pub fn build_frame(opcode: OpCode, fin: bool, mask: Option<[u8; 4]>, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame_size(payload.len(), mask.is_some()));
    write_frame(&mut out, opcode, fin, mask, payload);
    out
}

/// Appends one encoded frame to `out`.
pub fn write_frame(
    out: &mut Vec<u8>,
    opcode: OpCode,
    fin: bool,
    mask: Option<[u8; 4]>,
    payload: &[u8],
) {
    let fin_bit = if fin { 0x80 } else { 0x00 };
    out.push(fin_bit | opcode as u8);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    let len = payload.len();
    match extended_len_size(len) {
        0 => out.push(mask_bit | len as u8),
        2 => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key, 0);
        }
        None => out.extend_from_slice(payload),
    }
}

/// XORs `data` with `key`, where `data` starts `offset` bytes into the payload.
pub fn apply_mask(data: &mut [u8], key: [u8; 4], offset: u64) {
    let shift = (offset % 4) as usize;
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[(i + shift) % 4];
    }
}

/// Builds a close frame payload: 2-byte status code followed by a UTF-8 reason.
pub fn encode_close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Splits a close frame payload into its status code and reason.
///
/// An empty payload carries no status code.
pub fn decode_close_payload(payload: &[u8]) -> (Option<u16>, String) {
    if payload.len() < 2 {
        return (None, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (Some(code), reason)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Tells the parser whether to keep going after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop after the current callback; `execute` returns the bytes consumed
    /// so far and the caller resumes with the rest.
    Pause,
}

/// Callbacks invoked by [`FrameParser::execute`].
///
/// `on_frame_body` may be called several times per frame, once per chunk.
/// Chunks are already unmasked.
pub trait FrameHandler {
    fn on_frame_header(&mut self, header: &FrameHeader) -> Flow {
        let _ = header;
        Flow::Continue
    }

    fn on_frame_body(&mut self, header: &FrameHeader, chunk: &[u8]) -> Flow {
        let _ = (header, chunk);
        Flow::Continue
    }

    fn on_frame_end(&mut self, header: &FrameHeader) -> Flow;
}

#[derive(Debug, Clone, Copy)]
enum ParseState {
    Header,
    Body {
        header: FrameHeader,
        remaining: u64,
        offset: u64,
    },
}

/// Incremental, callback-driven frame decoder.
#[derive(Debug)]
pub struct FrameParser {
    state: ParseState,
    header_buf: Vec<u8>,
    scratch: Vec<u8>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Header,
            header_buf: Vec::with_capacity(MAX_HEADER_LEN),
            scratch: Vec::new(),
        }
    }

    /// `true` when the parser sits on a frame boundary.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParseState::Header) && self.header_buf.is_empty()
    }

    /// Feeds `data` to the parser and returns how many bytes were consumed.
    ///
    /// Fewer than `data.len()` bytes are consumed only when a callback
    /// returned [`Flow::Pause`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] on a malformed header.  The parser state is
    /// unspecified afterwards; the connection should be closed.
    pub fn execute<H>(&mut self, handler: &mut H, data: &[u8]) -> Result<usize, CodecError>
    where
        H: FrameHandler + ?Sized,
    {
        let mut pos = 0;

        while pos < data.len() {
            match self.state {
                ParseState::Header => {
                    self.header_buf.push(data[pos]);
                    pos += 1;

                    let Some(header) = parse_header(&self.header_buf)? else {
                        continue;
                    };
                    self.header_buf.clear();
                    trace!(
                        opcode = ?header.opcode,
                        fin = header.fin,
                        len = header.payload_len,
                        "frame header decoded"
                    );

                    let header_flow = handler.on_frame_header(&header);
                    if header.payload_len == 0 {
                        let end_flow = handler.on_frame_end(&header);
                        if header_flow == Flow::Pause || end_flow == Flow::Pause {
                            return Ok(pos);
                        }
                    } else {
                        self.state = ParseState::Body {
                            header,
                            remaining: header.payload_len,
                            offset: 0,
                        };
                        if header_flow == Flow::Pause {
                            return Ok(pos);
                        }
                    }
                }
                ParseState::Body {
                    header,
                    remaining,
                    offset,
                } => {
                    let available = (data.len() - pos) as u64;
                    let take = remaining.min(available) as usize;
                    let raw = &data[pos..pos + take];

                    let body_flow = match header.mask {
                        Some(key) => {
                            self.scratch.clear();
                            self.scratch.extend_from_slice(raw);
                            apply_mask(&mut self.scratch, key, offset);
                            handler.on_frame_body(&header, &self.scratch)
                        }
                        None => handler.on_frame_body(&header, raw),
                    };
                    pos += take;

                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.state = ParseState::Header;
                        let end_flow = handler.on_frame_end(&header);
                        if body_flow == Flow::Pause || end_flow == Flow::Pause {
                            return Ok(pos);
                        }
                    } else {
                        self.state = ParseState::Body {
                            header,
                            remaining,
                            offset: offset + take as u64,
                        };
                        if body_flow == Flow::Pause {
                            return Ok(pos);
                        }
                    }
                }
            }
        }

        Ok(pos)
    }
}

/// Tries to decode a complete header from the start of `buf`.
///
/// Returns `Ok(None)` while more bytes are needed.
fn parse_header(buf: &[u8]) -> Result<Option<FrameHeader>, CodecError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let (b0, b1) = (buf[0], buf[1]);
    let fin = b0 & 0x80 != 0;
    let rsv = (b0 >> 4) & 0x07;
    if rsv != 0 {
        return Err(CodecError::ReservedBits(rsv));
    }
    let opcode = OpCode::try_from(b0 & 0x0F)?;

    let masked = b1 & 0x80 != 0;
    let len7 = b1 & 0x7F;
    let ext_len = match len7 {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let mask_len = if masked { 4 } else { 0 };
    if buf.len() < 2 + ext_len + mask_len {
        return Ok(None);
    }

    let payload_len = match ext_len {
        2 => u64::from(u16::from_be_bytes([buf[2], buf[3]])),
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(bytes);
            if len & (1 << 63) != 0 {
                return Err(CodecError::InvalidLength(len));
            }
            len
        }
        _ => u64::from(len7),
    };

    if opcode.is_control() {
        if !fin {
            return Err(CodecError::FragmentedControl(opcode));
        }
        if payload_len > MAX_CONTROL_PAYLOAD {
            return Err(CodecError::ControlTooLarge(payload_len));
        }
    }

    let mask = if masked {
        let at = 2 + ext_len;
        Some([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        opcode,
        mask,
        payload_len,
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every callback so tests can assert on the exact sequence.
    #[derive(Default)]
    struct Recorder {
        headers: Vec<FrameHeader>,
        bodies: Vec<Vec<u8>>,
        ends: Vec<OpCode>,
        pause_after_end_of: Option<OpCode>,
    }

    impl FrameHandler for Recorder {
        fn on_frame_header(&mut self, header: &FrameHeader) -> Flow {
            self.headers.push(*header);
            self.bodies.push(Vec::new());
            Flow::Continue
        }

        fn on_frame_body(&mut self, _header: &FrameHeader, chunk: &[u8]) -> Flow {
            if let Some(body) = self.bodies.last_mut() {
                body.extend_from_slice(chunk);
            }
            Flow::Continue
        }

        fn on_frame_end(&mut self, header: &FrameHeader) -> Flow {
            self.ends.push(header.opcode);
            if self.pause_after_end_of == Some(header.opcode) {
                Flow::Pause
            } else {
                Flow::Continue
            }
        }
    }

    #[test]
    fn test_opcode_control_classification() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
        assert!(!OpCode::Continuation.is_control());
    }

    #[test]
    fn test_opcode_try_from_rejects_reserved_values() {
        assert_eq!(OpCode::try_from(0x3), Err(CodecError::UnknownOpcode(0x3)));
        assert_eq!(OpCode::try_from(0xB), Err(CodecError::UnknownOpcode(0xB)));
        assert_eq!(OpCode::try_from(0x9), Ok(OpCode::Ping));
    }

    #[test]
    fn test_build_frame_unmasked_text_matches_rfc_example() {
        // RFC 6455 §5.7: single-frame unmasked text message "Hello"
        let frame = build_frame(OpCode::Text, true, None, b"Hello");
        assert_eq!(frame, vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn test_build_frame_masked_text_matches_rfc_example() {
        // RFC 6455 §5.7: single-frame masked text message "Hello"
        let frame = build_frame(OpCode::Text, true, Some([0x37, 0xfa, 0x21, 0x3d]), b"Hello");
        assert_eq!(
            frame,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_frame_size_matches_built_length_across_length_encodings() {
        for len in [0usize, 125, 126, 65_535, 65_536] {
            let payload = vec![0xAB; len];
            let frame = build_frame(OpCode::Binary, true, Some([1, 2, 3, 4]), &payload);
            assert_eq!(frame.len(), frame_size(len, true), "payload length {len}");
        }
    }

    #[test]
    fn test_execute_decodes_masked_frame_back_to_plaintext() {
        // Arrange
        let frame = build_frame(OpCode::Text, true, Some([0x37, 0xfa, 0x21, 0x3d]), b"Hello");
        let mut parser = FrameParser::new();
        let mut rec = Recorder::default();

        // Act
        let consumed = parser.execute(&mut rec, &frame).expect("execute");

        // Assert
        assert_eq!(consumed, frame.len());
        assert_eq!(rec.bodies, vec![b"Hello".to_vec()]);
        assert_eq!(rec.ends, vec![OpCode::Text]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_execute_handles_frame_split_byte_by_byte() {
        // Arrange – 300-byte payload uses the 16-bit extended length
        let payload: Vec<u8> = (0..300u16).map(|i| (i % 251) as u8).collect();
        let frame = build_frame(OpCode::Binary, true, Some([9, 8, 7, 6]), &payload);
        let mut parser = FrameParser::new();
        let mut rec = Recorder::default();

        // Act
        for byte in &frame {
            let consumed = parser.execute(&mut rec, std::slice::from_ref(byte)).expect("execute");
            assert_eq!(consumed, 1);
        }

        // Assert
        assert_eq!(rec.headers.len(), 1);
        assert_eq!(rec.headers[0].payload_len, 300);
        assert_eq!(rec.bodies[0], payload);
        assert_eq!(rec.ends, vec![OpCode::Binary]);
    }

    #[test]
    fn test_execute_reports_every_frame_in_one_buffer() {
        // Arrange
        let mut data = build_frame(OpCode::Text, true, None, b"one");
        data.extend(build_frame(OpCode::Ping, true, None, b""));
        data.extend(build_frame(OpCode::Text, true, None, b"two"));
        let mut parser = FrameParser::new();
        let mut rec = Recorder::default();

        // Act
        let consumed = parser.execute(&mut rec, &data).expect("execute");

        // Assert
        assert_eq!(consumed, data.len());
        assert_eq!(rec.ends, vec![OpCode::Text, OpCode::Ping, OpCode::Text]);
        assert_eq!(rec.bodies[2], b"two".to_vec());
    }

    #[test]
    fn test_execute_pauses_after_requested_frame_and_resumes() {
        // Arrange
        let ping = build_frame(OpCode::Ping, true, None, b"");
        let mut data = ping.clone();
        data.extend(build_frame(OpCode::Text, true, None, b"after"));
        let mut parser = FrameParser::new();
        let mut rec = Recorder {
            pause_after_end_of: Some(OpCode::Ping),
            ..Default::default()
        };

        // Act – first call stops right after the ping
        let first = parser.execute(&mut rec, &data).expect("first execute");

        // Assert
        assert_eq!(first, ping.len());
        assert_eq!(rec.ends, vec![OpCode::Ping]);

        // Act – resume with the remainder
        let second = parser.execute(&mut rec, &data[first..]).expect("second execute");

        // Assert
        assert_eq!(first + second, data.len());
        assert_eq!(rec.ends, vec![OpCode::Ping, OpCode::Text]);
    }

    #[test]
    fn test_execute_rejects_fragmented_control_frame() {
        let frame = build_frame(OpCode::Ping, false, None, b"");
        let mut parser = FrameParser::new();
        let mut rec = Recorder::default();

        let result = parser.execute(&mut rec, &frame);

        assert_eq!(result, Err(CodecError::FragmentedControl(OpCode::Ping)));
    }

    #[test]
    fn test_execute_rejects_oversized_control_frame() {
        let frame = build_frame(OpCode::Close, true, None, &[0u8; 126]);
        let mut parser = FrameParser::new();
        let mut rec = Recorder::default();

        let result = parser.execute(&mut rec, &frame);

        assert_eq!(result, Err(CodecError::ControlTooLarge(126)));
    }

    #[test]
    fn test_execute_rejects_reserved_bits() {
        // FIN + RSV1 + text, zero length
        let mut parser = FrameParser::new();
        let mut rec = Recorder::default();

        let result = parser.execute(&mut rec, &[0xC1, 0x00]);

        assert_eq!(result, Err(CodecError::ReservedBits(0b100)));
    }

    #[test]
    fn test_execute_rejects_unknown_opcode() {
        let mut parser = FrameParser::new();
        let mut rec = Recorder::default();

        let result = parser.execute(&mut rec, &[0x83, 0x00]);

        assert_eq!(result, Err(CodecError::UnknownOpcode(0x3)));
    }

    #[test]
    fn test_execute_decodes_64_bit_length() {
        // Arrange
        let payload = vec![0x5A; 70_000];
        let frame = build_frame(OpCode::Binary, true, None, &payload);
        assert_eq!(frame[1] & 0x7F, 127);
        let mut parser = FrameParser::new();
        let mut rec = Recorder::default();

        // Act – feed in two uneven halves
        let split = 1_000;
        let a = parser.execute(&mut rec, &frame[..split]).expect("first half");
        let b = parser.execute(&mut rec, &frame[split..]).expect("second half");

        // Assert
        assert_eq!(a + b, frame.len());
        assert_eq!(rec.headers[0].payload_len, 70_000);
        assert_eq!(rec.bodies[0].len(), 70_000);
    }

    #[test]
    fn test_apply_mask_with_offset_continues_key_rotation() {
        // Arrange
        let key = [1, 2, 3, 4];
        let plain = b"abcdefgh".to_vec();
        let mut whole = plain.clone();
        apply_mask(&mut whole, key, 0);

        // Act – mask the same data in two chunks, the second starting at offset 3
        let mut first = plain[..3].to_vec();
        let mut second = plain[3..].to_vec();
        apply_mask(&mut first, key, 0);
        apply_mask(&mut second, key, 3);

        // Assert
        first.extend(second);
        assert_eq!(first, whole);
    }

    #[test]
    fn test_close_payload_encode_then_decode() {
        let payload = encode_close_payload(CLOSE_NORMAL, "bye");
        assert_eq!(decode_close_payload(&payload), (Some(1000), "bye".to_string()));
        assert_eq!(decode_close_payload(&[]), (None, String::new()));
    }
}
