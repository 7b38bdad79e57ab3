//! WebSocket client session: connect, Upgrade handshake, event loop, close.
//!
//! # Event loop (for beginners)
//!
//! Once the handshake succeeds the session owns its socket on one thread
//! and repeats a single step:
//!
//! ```text
//! wait for data, at most min(idle time left, stop poll interval)
//!   ├─ bytes       → frame parser → FrameReactor
//!   │                  ├─ ping  → send empty pong immediately
//!   │                  └─ close → leave the loop (Closing)
//!   ├─ EOF         → leave the loop
//!   ├─ timed out   → idle timeout reached? send one keepalive
//!   ├─ interrupted → wait again
//!   └─ error       → leave the loop
//! ```
//!
//! On the way out the session sends its own close frame if the peer can
//! still read it, shuts the socket down and ends in `Closed`.
//!
//! The socket is abstracted behind [`SessionSocket`] so the loop can be
//! driven by a scripted socket in tests.

pub mod socket;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;
use wirebridge_core::engine::{RandomSource, RngError, TransportError};
use wirebridge_core::protocol::frame::{build_frame, encode_close_payload, CodecError, FrameParser, OpCode, CLOSE_NORMAL};
use wirebridge_core::protocol::handshake::{check_request_fields, HandshakeError, HandshakeKey, ResponseParser, UpgradeRequest, UpgradeResponse};
use wirebridge_core::protocol::line_reader::{LineError, LineReader};

use crate::application::frame_dispatch::{DispatchState, FrameAction, FrameReactor};
use crate::domain::{CloseReason, SessionConfig, SessionState, SessionStats, SessionSummary, TransportConfig};
use crate::infrastructure::rng::RngAdapter;

pub use socket::{RecvOutcome, SessionSocket, TcpSessionSocket};

/// Errors returned by session operations.
///
/// Failures inside a running event loop are not errors: they end the loop
/// and are reported as the [`CloseReason`] of the returned summary.
#[derive(Debug, Error)]
pub enum WsError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Line(#[from] LineError),

    #[error("random source failed: {0}")]
    Rng(#[from] RngError),

    #[error("no complete handshake response within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("session has no connected socket")]
    NotConnected,

    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Where a session connects and what it asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    /// Request path, echoed verbatim into the request line.
    pub path: String,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub bearer_token: Option<String>,
}

impl SessionTarget {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Rejects a host, path or token that cannot be written into the
    /// request head as a single line.
    pub fn validate(&self) -> Result<(), WsError> {
        check_request_fields(&self.host, &self.path, self.bearer_token.as_deref())
            .map_err(|e| WsError::InvalidConfig(e.to_string()))
    }

    /// `Host` header value: the port is omitted when it is 80.
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// One WebSocket client session over a [`SessionSocket`].
pub struct WebSocketSession<S: SessionSocket = TcpSessionSocket> {
    id: Uuid,
    target: SessionTarget,
    config: SessionConfig,
    connect_timeout: Duration,
    socket: Option<S>,
    state: SessionState,
    rng: Box<dyn RandomSource + Send>,
    parser: FrameParser,
    dispatch: DispatchState,
    pending_input: Vec<u8>,
}

impl WebSocketSession<TcpSessionSocket> {
    /// A session that will open its own TCP socket in [`connect`](Self::connect).
    pub fn new(target: SessionTarget, config: SessionConfig) -> Result<Self, WsError> {
        Self::build(None, target, config)
    }

    pub fn with_transport_config(mut self, transport: &TransportConfig) -> Self {
        self.connect_timeout = transport.connect_timeout;
        self
    }

    /// Resolves the target and connects to the first reachable candidate.
    ///
    /// A socket left over from an earlier `connect` is shut down first.
    pub fn connect(&mut self) -> Result<SocketAddr, WsError> {
        if self.state != SessionState::Connecting {
            return Err(WsError::InvalidState {
                state: self.state,
                operation: "connect",
            });
        }
        if let Some(mut old) = self.socket.take() {
            old.shutdown();
        }

        let (socket, addr) = TcpSessionSocket::connect(&self.target.host, self.target.port, self.connect_timeout)?;
        info!(session = %self.id, peer = %addr, "websocket socket connected");
        self.socket = Some(socket);
        Ok(addr)
    }
}

impl<S: SessionSocket> WebSocketSession<S> {
    /// A session over an already connected socket.
    pub fn with_socket(socket: S, target: SessionTarget, config: SessionConfig) -> Result<Self, WsError> {
        Self::build(Some(socket), target, config)
    }

    fn build(socket: Option<S>, target: SessionTarget, config: SessionConfig) -> Result<Self, WsError> {
        config.validate().map_err(WsError::InvalidConfig)?;
        target.validate()?;

        let id = Uuid::new_v4();
        let mut rng = RngAdapter::new();
        let mut entropy = id.as_bytes().to_vec();
        entropy.extend_from_slice(target.host.as_bytes());
        entropy.extend_from_slice(target.path.as_bytes());
        rng.seed(Some(entropy.as_slice()));

        Ok(Self {
            id,
            target,
            config,
            connect_timeout: TransportConfig::default().connect_timeout,
            socket,
            state: SessionState::Connecting,
            rng: Box::new(rng),
            parser: FrameParser::new(),
            dispatch: DispatchState::new(),
            pending_input: Vec::new(),
        })
    }

    /// Replaces the source of handshake keys and frame masks.
    pub fn with_random_source(mut self, rng: Box<dyn RandomSource + Send>) -> Self {
        self.rng = rng;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn stats(&self) -> SessionStats {
        self.dispatch.stats()
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    /// Sends the Upgrade request and validates the server's answer.
    ///
    /// On success the session is `Open`.  On failure the socket is released
    /// and the session is `Closed`.
    ///
    /// # Errors
    ///
    /// - [`HandshakeError::HandshakeRejected`] for any status other than 101.
    /// - [`HandshakeError::InvalidResponse`] for an unparseable response.
    /// - [`HandshakeError::MissingAcceptKey`] / [`HandshakeError::AcceptKeyMismatch`]
    ///   when the server does not prove it read our key.
    /// - [`WsError::HandshakeTimeout`] when the response does not complete in time.
    pub fn handshake(&mut self) -> Result<(), WsError> {
        let span = info_span!("ws_handshake", session = %self.id);
        let _enter = span.enter();

        if self.state != SessionState::Connecting {
            return Err(WsError::InvalidState {
                state: self.state,
                operation: "handshake",
            });
        }
        if self.socket.is_none() {
            return Err(WsError::NotConnected);
        }

        match self.exchange_upgrade() {
            Ok(response) => {
                self.set_state(SessionState::Open);
                info!(
                    status = response.status,
                    path = %self.target.path,
                    leftover = self.pending_input.len(),
                    "websocket open"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "websocket handshake failed");
                self.release_socket();
                Err(e)
            }
        }
    }

    fn exchange_upgrade(&mut self) -> Result<UpgradeResponse, WsError> {
        let mut nonce = [0u8; 16];
        self.rng.random(&mut nonce)?;
        let key = HandshakeKey::from_nonce(nonce);
        let request = UpgradeRequest::new(self.target.host_header(), self.target.path.clone(), key.clone())
            .with_bearer_token(self.target.bearer_token.clone());

        let timeout = self.config.handshake_timeout;
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut lines = LineReader::new();
        let mut head = ResponseParser::new();

        let socket = self.socket.as_mut().ok_or(WsError::NotConnected)?;
        // Every later send, keepalives and the close frame included, is
        // bounded by the same limit.
        socket.set_send_timeout(timeout)?;
        socket.send_all(&request.to_bytes())?;
        debug!(key = key.as_str(), "upgrade request sent");

        let response = 'read: loop {
            while let Some(line) = lines.next_line()? {
                if let Some(response) = head.push_line(&line)? {
                    break 'read response;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WsError::HandshakeTimeout(timeout));
            }

            match socket.recv_timeout(&mut buf, remaining)? {
                RecvOutcome::Data(n) => lines.feed(&buf[..n]),
                RecvOutcome::Eof => {
                    let last = lines.finish()?;
                    match head.push_line(&last)? {
                        Some(response) => break 'read response,
                        None => {
                            return Err(HandshakeError::InvalidResponse(
                                "connection closed before the end of the response headers".into(),
                            )
                            .into())
                        }
                    }
                }
                RecvOutcome::TimedOut | RecvOutcome::Interrupted => {}
            }
        };

        response.validate(&key)?;
        self.pending_input = lines.into_remaining();
        Ok(response)
    }

    // ── Event loop ────────────────────────────────────────────────────────────

    /// Runs the event loop until the peer closes, an error occurs or `stop`
    /// becomes `true`.  The session is `Closed` afterwards.
    ///
    /// # Errors
    ///
    /// [`WsError::InvalidState`] unless the session is `Open`.  Everything
    /// that happens once the loop runs is reported in the summary.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<SessionSummary, WsError> {
        let span = info_span!("ws_session", session = %self.id);
        let _enter = span.enter();

        if self.state != SessionState::Open {
            return Err(WsError::InvalidState {
                state: self.state,
                operation: "run",
            });
        }

        let reason = self.event_loop(stop);
        Ok(self.finish(reason))
    }

    fn event_loop(&mut self, stop: &AtomicBool) -> CloseReason {
        let idle_timeout = self.config.idle_timeout;
        let poll = self.config.stop_poll_interval;
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let mut last_activity = Instant::now();

        let leftover = std::mem::take(&mut self.pending_input);
        if let Some(reason) = self.dispatch_bytes(&leftover) {
            return reason;
        }

        loop {
            if stop.load(Ordering::Relaxed) {
                return CloseReason::Stopped;
            }

            let idle = last_activity.elapsed();
            if idle >= idle_timeout {
                if let Err(e) = self.send_keepalive() {
                    error!(error = %e, "keepalive send failed");
                    return CloseReason::Io(e.to_string());
                }
                last_activity = Instant::now();
                continue;
            }

            let wait = (idle_timeout - idle).min(poll);
            let outcome = match self.socket.as_mut() {
                Some(socket) => socket.recv_timeout(&mut buf, wait),
                None => return CloseReason::Io("socket released".into()),
            };

            match outcome {
                Ok(RecvOutcome::Data(n)) => {
                    last_activity = Instant::now();
                    if let Some(reason) = self.dispatch_bytes(&buf[..n]) {
                        return reason;
                    }
                }
                Ok(RecvOutcome::Eof) => {
                    info!("peer closed the connection");
                    return CloseReason::PeerEof;
                }
                Ok(RecvOutcome::TimedOut) => {}
                Ok(RecvOutcome::Interrupted) => debug!("wait interrupted; retrying"),
                Err(e) => {
                    error!(error = %e, "receive failed");
                    return CloseReason::Io(e.to_string());
                }
            }
        }
    }

    /// Feeds `data` to the frame parser and carries out the actions it asks
    /// for.  Returns a reason when the loop must end.
    fn dispatch_bytes(&mut self, data: &[u8]) -> Option<CloseReason> {
        let mut offset = 0;

        while offset < data.len() {
            let parsed = self
                .parser
                .execute(&mut FrameReactor::new(&mut self.dispatch), &data[offset..]);
            match parsed {
                Ok(consumed) => offset += consumed,
                Err(e) => {
                    warn!(error = %e, "malformed frame from server");
                    return Some(CloseReason::Protocol(e.to_string()));
                }
            }

            match self.dispatch.take_action() {
                Some(FrameAction::ReplyPong) => {
                    if let Err(e) = self.send_frame(OpCode::Pong, &[]) {
                        error!(error = %e, "pong send failed");
                        return Some(CloseReason::Io(e.to_string()));
                    }
                    self.dispatch.stats_mut().pongs_sent += 1;
                    debug!("pong sent");
                }
                Some(FrameAction::PeerClosing { code }) => {
                    info!(?code, "server sent close frame");
                    return Some(CloseReason::PeerClosed { code });
                }
                None => {}
            }
        }

        None
    }

    fn send_keepalive(&mut self) -> Result<(), WsError> {
        let opcode = self.config.keepalive.opcode();
        let payload = self.config.keepalive.as_bytes().to_vec();
        self.send_frame(opcode, &payload)?;
        self.dispatch.stats_mut().keepalives_sent += 1;
        debug!(?opcode, len = payload.len(), "keepalive sent");
        Ok(())
    }

    fn send_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), WsError> {
        let mask = if self.config.mask_frames {
            let mut key = [0u8; 4];
            self.rng.random(&mut key)?;
            Some(key)
        } else {
            None
        };
        let frame = build_frame(opcode, true, mask, payload);

        let socket = self.socket.as_mut().ok_or(WsError::NotConnected)?;
        socket.send_all(&frame)?;
        Ok(())
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    fn finish(&mut self, reason: CloseReason) -> SessionSummary {
        self.set_state(SessionState::Closing);
        info!(%reason, "websocket closing");

        if reason.socket_usable() {
            self.send_close_frame(reason.close_code());
        }
        self.release_socket();

        SessionSummary {
            reason,
            stats: self.dispatch.stats(),
        }
    }

    /// Best-effort close frame; failure is logged only.
    fn send_close_frame(&mut self, code: u16) {
        let payload = encode_close_payload(code, "");
        if let Err(e) = self.send_frame(OpCode::Close, &payload) {
            warn!(error = %e, code, "close frame not delivered");
        }
    }

    fn release_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.shutdown();
        }
        if self.state != SessionState::Closed {
            self.set_state(SessionState::Closed);
        }
    }

    /// Sends a normal-closure frame if the session is open, then releases
    /// the socket.  Idempotent.
    pub fn close(&mut self) {
        match self.state {
            SessionState::Closed => {}
            SessionState::Open => {
                self.set_state(SessionState::Closing);
                self.send_close_frame(CLOSE_NORMAL);
                self.release_socket();
            }
            SessionState::Connecting | SessionState::Closing => self.release_socket(),
        }
    }

    fn set_state(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

impl<S: SessionSocket> Drop for WebSocketSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
