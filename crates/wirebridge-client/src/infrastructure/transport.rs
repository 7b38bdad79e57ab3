//! Transport adapter: one TCP socket behind the engine's send/recv callbacks.
//!
//! # Retry sentinels instead of blocking (for beginners)
//!
//! After `connect` the socket is switched to non-blocking mode.  A `send` on
//! a full socket buffer or a `recv` with nothing to read then fails at the
//! OS level with `EWOULDBLOCK`.  The adapter turns that into
//! [`IoProgress::WantWrite`] / [`IoProgress::WantRead`] so the engine can park
//! its state machine and try again later.  Only hard failures (reset, broken
//! pipe) become [`TransportError`]s.
//!
//! ```text
//! write() -> n          => Transferred(n)     (may be short)
//! write() -> WouldBlock => WantWrite
//! write() -> EPIPE      => SendFailed
//! read()  -> 0          => Transferred(0)     (orderly peer shutdown)
//! read()  -> WouldBlock => WantRead
//! read()  -> ECONNRESET => RecvFailed
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};
use wirebridge_core::engine::{BioTransport, IoProgress, TransportError};

use crate::domain::TransportConfig;

// ── Resolution and candidate walk ─────────────────────────────────────────────

/// Resolves `host:port` to candidate addresses in resolver order, any family.
///
/// # Errors
///
/// [`TransportError::UnknownHost`] if resolution fails or yields nothing.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
    let unknown = |source: io::Error| TransportError::UnknownHost {
        host: host.to_owned(),
        port,
        source,
    };

    let candidates: Vec<SocketAddr> = (host, port).to_socket_addrs().map_err(unknown)?.collect();
    if candidates.is_empty() {
        return Err(unknown(io::Error::new(
            io::ErrorKind::NotFound,
            "resolver returned no addresses",
        )));
    }
    debug!(host, port, count = candidates.len(), "resolved candidates");
    Ok(candidates)
}

/// Tries each candidate in order and returns the first connected stream.
///
/// Failed attempts drop their socket before the next one starts.  A zero
/// `timeout` means the OS default connect timeout.
///
/// # Errors
///
/// [`TransportError::ConnectFailed`] when every candidate fails (or the list
/// is empty).
pub fn connect_first(
    candidates: &[SocketAddr],
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), TransportError> {
    let mut last_error = None;

    for addr in candidates {
        let attempt = if timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(addr, timeout)
        };
        match attempt {
            Ok(stream) => return Ok((stream, *addr)),
            Err(e) => {
                debug!(%addr, error = %e, "candidate refused");
                last_error = Some(e);
            }
        }
    }

    Err(TransportError::ConnectFailed {
        attempted: candidates.len(),
        last_error,
    })
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// Owns at most one connected, non-blocking TCP socket.
#[derive(Debug, Default)]
pub struct TransportAdapter {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    config: TransportConfig,
}

impl TransportAdapter {
    /// A disconnected adapter with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            stream: None,
            peer: None,
            config,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Address of the candidate that accepted the connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Resolves `host:port` and connects to the first reachable candidate.
    ///
    /// Any existing connection is closed first.
    ///
    /// # Errors
    ///
    /// - [`TransportError::InvalidParameter`] for an empty host.
    /// - [`TransportError::UnknownHost`] if resolution fails.
    /// - [`TransportError::ConnectFailed`] if no candidate accepts.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        self.close();
        if host.trim().is_empty() {
            return Err(TransportError::InvalidParameter("host must not be empty".into()));
        }

        let candidates = resolve(host, port)?;
        self.connect_candidates(&candidates)
    }

    /// Connects to the first reachable address in `candidates`.
    ///
    /// Any existing connection is closed first.
    pub fn connect_candidates(&mut self, candidates: &[SocketAddr]) -> Result<SocketAddr, TransportError> {
        self.close();

        let (stream, addr) = connect_first(candidates, self.config.connect_timeout)?;
        let configured = stream
            .set_nonblocking(true)
            .and_then(|()| stream.set_nodelay(true));
        if let Err(e) = configured {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(TransportError::ConnectFailed {
                attempted: candidates.len(),
                last_error: Some(e),
            });
        }

        info!(peer = %addr, "transport connected");
        self.stream = Some(stream);
        self.peer = Some(addr);
        Ok(addr)
    }

    /// Writes as much of `buf` as the socket takes without blocking.
    pub fn send(&mut self, buf: &[u8]) -> Result<IoProgress, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        match stream.write(buf) {
            Ok(n) => Ok(IoProgress::Transferred(n)),
            Err(e) if is_transient(&e) => Ok(IoProgress::WantWrite),
            Err(e) => {
                warn!(error = %e, "transport send failed");
                Err(TransportError::SendFailed(e))
            }
        }
    }

    /// Reads whatever is available without blocking.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<IoProgress, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        match stream.read(buf) {
            Ok(n) => Ok(IoProgress::Transferred(n)),
            Err(e) if is_transient(&e) => Ok(IoProgress::WantRead),
            Err(e) => {
                warn!(error = %e, "transport receive failed");
                Err(TransportError::RecvFailed(e))
            }
        }
    }

    /// Shuts down both directions and releases the socket.  Idempotent.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The peer may already be gone; the socket is released either way.
            let _ = stream.shutdown(Shutdown::Both);
            debug!(peer = ?self.peer, "transport closed");
        }
        self.peer = None;
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

impl BioTransport for TransportAdapter {
    fn send(&mut self, buf: &[u8]) -> Result<IoProgress, TransportError> {
        TransportAdapter::send(self, buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<IoProgress, TransportError> {
        TransportAdapter::recv(self, buf)
    }
}

// ── std::io bridge ────────────────────────────────────────────────────────────
//
// Rust TLS engines drive a `Read + Write` socket and expect `WouldBlock`
// where a C engine would expect want-read / want-write.

fn into_io_error(err: TransportError) -> io::Error {
    match err {
        TransportError::SendFailed(e) | TransportError::RecvFailed(e) => e,
        TransportError::NotConnected => io::Error::from(io::ErrorKind::NotConnected),
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl Read for TransportAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match TransportAdapter::recv(self, buf).map_err(into_io_error)? {
            IoProgress::Transferred(n) => Ok(n),
            IoProgress::WantRead | IoProgress::WantWrite => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl Write for TransportAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match TransportAdapter::send(self, buf).map_err(into_io_error)? {
            IoProgress::Transferred(n) => Ok(n),
            IoProgress::WantRead | IoProgress::WantWrite => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.flush(),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}
