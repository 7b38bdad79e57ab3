//! The socket a WebSocket session runs on.
//!
//! The event loop needs one primitive the transport adapter deliberately
//! lacks: a receive that blocks for *at most* a given time.  On a TCP
//! socket that is a read with `SO_RCVTIMEO` set, which reports expiry as
//! `WouldBlock` or `TimedOut` depending on the platform.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use wirebridge_core::engine::TransportError;

use crate::infrastructure::transport::{connect_first, resolve};

/// Result of one bounded receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// `n > 0` bytes were read.
    Data(usize),
    /// The peer shut down its sending side.
    Eof,
    /// Nothing arrived within the timeout.
    TimedOut,
    /// The wait was cut short by a signal; nothing was read.
    Interrupted,
}

/// Byte stream used by a WebSocket session.
pub trait SessionSocket {
    /// Waits up to `timeout` for data and reads what is available.
    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<RecvOutcome>;

    /// Writes all of `data`.
    fn send_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Bounds how long a single [`send_all`](Self::send_all) may block on a
    /// peer that stops reading.
    fn set_send_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    /// Shuts down both directions.  Errors are ignored.
    fn shutdown(&mut self);
}

/// Smallest timeout handed to the OS; zero would mean "block forever".
const MIN_OS_TIMEOUT: Duration = Duration::from_millis(1);

/// Blocking TCP stream with per-call read timeouts and an optional write
/// timeout.
#[derive(Debug)]
pub struct TcpSessionSocket {
    stream: TcpStream,
    read_timeout: Option<Duration>,
}

impl TcpSessionSocket {
    /// Resolves `host:port` and connects to the first reachable candidate,
    /// the same way the transport adapter does.
    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<(Self, SocketAddr), TransportError> {
        if host.trim().is_empty() {
            return Err(TransportError::InvalidParameter("host must not be empty".into()));
        }
        let candidates = resolve(host, port)?;
        let (stream, addr) = connect_first(&candidates, connect_timeout)?;
        let _ = stream.set_nodelay(true);
        Ok((Self::from_stream(stream), addr))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            read_timeout: None,
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl SessionSocket for TcpSessionSocket {
    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<RecvOutcome> {
        let timeout = timeout.max(MIN_OS_TIMEOUT);
        if self.read_timeout != Some(timeout) {
            self.stream.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }

        match self.stream.read(buf) {
            Ok(0) => Ok(RecvOutcome::Eof),
            Ok(n) => Ok(RecvOutcome::Data(n)),
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Ok(RecvOutcome::TimedOut),
                io::ErrorKind::Interrupted => Ok(RecvOutcome::Interrupted),
                _ => Err(e),
            },
        }
    }

    /// An expired write surfaces from `send_all` as `WouldBlock` or
    /// `TimedOut`; part of `data` may already have been written.
    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn set_send_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_write_timeout(Some(timeout.max(MIN_OS_TIMEOUT)))
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    fn connected_pair() -> (TcpSessionSocket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = TcpStream::connect(addr).expect("connect");
        let (server, _) = listener.accept().expect("accept");
        (TcpSessionSocket::from_stream(client), server)
    }

    #[test]
    fn test_recv_timeout_expires_without_data() {
        // Arrange
        let (mut socket, _server) = connected_pair();
        let mut buf = [0u8; 16];
        let start = Instant::now();

        // Act
        let outcome = socket
            .recv_timeout(&mut buf, Duration::from_millis(50))
            .expect("recv");

        // Assert
        assert_eq!(outcome, RecvOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_recv_timeout_returns_available_data() {
        let (mut socket, mut server) = connected_pair();
        server.write_all(b"abc").expect("server write");
        let mut buf = [0u8; 16];

        let outcome = socket
            .recv_timeout(&mut buf, Duration::from_secs(2))
            .expect("recv");

        assert_eq!(outcome, RecvOutcome::Data(3));
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_recv_timeout_reports_eof() {
        let (mut socket, server) = connected_pair();
        drop(server);
        let mut buf = [0u8; 16];

        let outcome = socket
            .recv_timeout(&mut buf, Duration::from_secs(2))
            .expect("recv");

        assert_eq!(outcome, RecvOutcome::Eof);
    }

    #[test]
    fn test_zero_timeout_is_clamped_instead_of_blocking_forever() {
        let (mut socket, _server) = connected_pair();
        let mut buf = [0u8; 4];

        let outcome = socket.recv_timeout(&mut buf, Duration::ZERO).expect("recv");

        assert_eq!(outcome, RecvOutcome::TimedOut);
    }

    #[test]
    fn test_connect_rejects_empty_host() {
        let result = TcpSessionSocket::connect("", 80, Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::InvalidParameter(_))));
    }

    #[test]
    fn test_send_to_peer_that_never_reads_gives_up_after_send_timeout() {
        // Arrange
        let (mut socket, _server) = connected_pair();
        socket
            .set_send_timeout(Duration::from_millis(100))
            .expect("write timeout");
        let flood = vec![0u8; 64 * 1024 * 1024];
        let start = Instant::now();

        // Act
        let err = socket.send_all(&flood).expect_err("kernel buffers cannot absorb the flood");

        // Assert
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
