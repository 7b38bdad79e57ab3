//! Loopback integration tests for the WebSocket session.
//!
//! A minimal server runs on its own thread: it reads the Upgrade request
//! byte by byte, answers with an accept key computed by `tungstenite`, then
//! plays a scripted exchange of frames.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tungstenite::handshake::derive_accept_key;
use wirebridge_client::domain::{CloseReason, SessionConfig, SessionState};
use wirebridge_client::infrastructure::websocket::{SessionTarget, WebSocketSession, WsError};
use wirebridge_core::protocol::frame::{build_frame, decode_close_payload, encode_close_payload};
use wirebridge_core::{Flow, FrameHandler, FrameHeader, FrameParser, HandshakeError, OpCode};

// ── Test server ───────────────────────────────────────────────────────────────

/// Reads the request head one byte at a time and returns it as text.
fn read_request(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).expect("server read");
        assert_eq!(n, 1, "client closed during request");
        head.push(byte[0]);
    }
    String::from_utf8(head).expect("ascii request")
}

fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn accept_upgrade(stream: &mut TcpStream) -> String {
    let request = read_request(stream);
    let key = header(&request, "Sec-WebSocket-Key").expect("key header");
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    );
    stream.write_all(response.as_bytes()).expect("server write");
    request
}

#[derive(Default)]
struct Frames(Vec<(OpCode, Vec<u8>, bool)>);

impl FrameHandler for Frames {
    fn on_frame_header(&mut self, header: &FrameHeader) -> Flow {
        self.0.push((header.opcode, Vec::new(), header.mask.is_some()));
        Flow::Continue
    }

    fn on_frame_body(&mut self, _header: &FrameHeader, chunk: &[u8]) -> Flow {
        if let Some((_, body, _)) = self.0.last_mut() {
            body.extend_from_slice(chunk);
        }
        Flow::Continue
    }

    fn on_frame_end(&mut self, _header: &FrameHeader) -> Flow {
        Flow::Continue
    }
}

/// Reads from the client until `count` complete frames have arrived.
fn read_frames(stream: &mut TcpStream, parser: &mut FrameParser, count: usize) -> Vec<(OpCode, Vec<u8>, bool)> {
    let mut frames = Frames::default();
    let mut buf = [0u8; 256];
    while frames.0.len() < count || !parser.is_idle() {
        let n = stream.read(&mut buf).expect("server read");
        assert!(n > 0, "client closed early");
        parser.execute(&mut frames, &buf[..n]).expect("client frames are valid");
    }
    frames.0
}

fn spawn_server<F>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        script(stream);
    });
    (addr, handle)
}

fn connected_session(addr: SocketAddr, config: SessionConfig) -> WebSocketSession {
    let target = SessionTarget::new("127.0.0.1", addr.port(), "/chat").with_bearer_token("t0k");
    let mut session = WebSocketSession::new(target, config).expect("session");
    session.connect().expect("connect");
    session
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_ping_is_answered_and_server_close_is_echoed() {
    // Arrange
    let (addr, server) = spawn_server(|mut stream| {
        let request = accept_upgrade(&mut stream);
        assert!(request.starts_with("GET /chat HTTP/1.1\r\n"));
        assert_eq!(header(&request, "Authorization"), Some("Bearer t0k"));

        let mut parser = FrameParser::new();
        stream.write_all(&build_frame(OpCode::Ping, true, None, b"p1")).expect("ping");
        let pong = read_frames(&mut stream, &mut parser, 1);
        assert_eq!(pong[0].0, OpCode::Pong);
        assert!(pong[0].1.is_empty());
        assert!(pong[0].2, "client frames are masked");

        stream
            .write_all(&build_frame(OpCode::Close, true, None, &encode_close_payload(1000, "done")))
            .expect("close");
        let close = read_frames(&mut stream, &mut parser, 1);
        assert_eq!(close[0].0, OpCode::Close);
        assert_eq!(decode_close_payload(&close[0].1).0, Some(1000));
    });
    let mut session = connected_session(addr, SessionConfig::default());

    // Act
    session.handshake().expect("handshake");
    let summary = session.run(&AtomicBool::new(false)).expect("run");

    // Assert
    assert_eq!(summary.reason, CloseReason::PeerClosed { code: Some(1000) });
    assert_eq!(summary.stats.pongs_sent, 1);
    assert_eq!(session.state(), SessionState::Closed);
    server.join().expect("server thread");
}

#[test]
fn test_quiet_server_receives_keepalive() {
    // Arrange
    let (addr, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
        let mut parser = FrameParser::new();
        let keepalive = read_frames(&mut stream, &mut parser, 1);
        assert_eq!(keepalive[0].0, OpCode::Text);
        assert_eq!(keepalive[0].1, br#"{"type":"ping"}"#.to_vec());
        stream.write_all(&build_frame(OpCode::Close, true, None, &[])).expect("close");
        read_frames(&mut stream, &mut parser, 1);
    });
    let config = SessionConfig {
        idle_timeout: Duration::from_millis(100),
        stop_poll_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let mut session = connected_session(addr, config);

    // Act
    session.handshake().expect("handshake");
    let summary = session.run(&AtomicBool::new(false)).expect("run");

    // Assert
    assert_eq!(summary.reason, CloseReason::PeerClosed { code: None });
    assert!(summary.stats.keepalives_sent >= 1);
    server.join().expect("server thread");
}

#[test]
fn test_server_disconnect_ends_session_with_eof() {
    let (addr, server) = spawn_server(|mut stream| {
        accept_upgrade(&mut stream);
    });
    let mut session = connected_session(addr, SessionConfig::default());

    session.handshake().expect("handshake");
    let summary = session.run(&AtomicBool::new(false)).expect("run");

    assert_eq!(summary.reason, CloseReason::PeerEof);
    server.join().expect("server thread");
}

#[test]
fn test_non_upgrade_response_is_rejected() {
    // Arrange
    let (addr, server) = spawn_server(|mut stream| {
        read_request(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .expect("server write");
    });
    let mut session = connected_session(addr, SessionConfig::default());

    // Act
    let result = session.handshake();

    // Assert
    assert!(matches!(
        result,
        Err(WsError::Handshake(HandshakeError::HandshakeRejected { status: 200 }))
    ));
    assert_eq!(session.state(), SessionState::Closed);
    server.join().expect("server thread");
}

#[test]
fn test_connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    let target = SessionTarget::new("127.0.0.1", port, "/");
    let mut session = WebSocketSession::new(target, SessionConfig::default()).expect("session");

    let result = session.connect();

    assert!(matches!(result, Err(WsError::Transport(_))));
    assert_eq!(session.state(), SessionState::Connecting);
}
