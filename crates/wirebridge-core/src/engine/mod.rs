//! Callback contract between wirebridge and a pluggable secure-channel engine.
//!
//! # What is a secure-channel engine? (for beginners)
//!
//! A TLS library does not open sockets.  It asks its host application for
//! three things through callbacks with fixed shapes:
//!
//! - **random bytes** – `(context, buffer, length) -> status`
//! - **send** – `(context, buffer, length) -> bytes | want-read | want-write | error`
//! - **recv** – `(context, buffer, length) -> bytes | want-read | want-write | error`
//!
//! The *want-read* / *want-write* answers are **retry sentinels**: they are not
//! errors, they tell the engine "the socket is not ready right now, park your
//! state machine and call me again later".  Hiding them (by blocking inside
//! the adapter) would stall the engine; reporting them as errors would kill
//! the connection.
//!
//! In Rust the context pointer disappears: each callback family is a trait
//! implemented by a concrete adapter type, and the adapter *is* the context.
//!
//! # Retry loops
//!
//! Scheduling retries is the caller's job.  [`send_all`] and [`recv_some`]
//! are the call-site loops: they re-invoke the transport after every retry
//! sentinel and hand the readiness wait to a closure supplied by the caller.

use std::io;

use thiserror::Error;

pub mod timer;

pub use timer::{DelayStatus, DelayTimer, EngineTimer};

// ── I/O vocabulary ────────────────────────────────────────────────────────────

/// Outcome of a single non-fatal transport call.
///
/// Fatal conditions are reported as `Err(TransportError)` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoProgress {
    /// `n` bytes were written or read.  May be fewer than requested.
    ///
    /// `Transferred(0)` from a receive is an orderly peer shutdown.
    Transferred(usize),
    /// The socket is not readable yet; call again later with the same buffer.
    WantRead,
    /// The socket is not writable yet; call again later with the same buffer.
    WantWrite,
}

impl IoProgress {
    /// Returns `true` for the `WantRead` / `WantWrite` retry sentinels.
    pub fn is_retry(self) -> bool {
        matches!(self, IoProgress::WantRead | IoProgress::WantWrite)
    }
}

// ── Error taxonomy ────────────────────────────────────────────────────────────

/// Fatal transport errors.  None of these are retried internally.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed input from the caller (empty host, for example).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Name resolution failed or produced no addresses.
    #[error("could not resolve {host}:{port}: {source}")]
    UnknownHost {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Every resolved candidate address was tried and none accepted.
    #[error("connect failed after {attempted} candidate address(es)")]
    ConnectFailed {
        attempted: usize,
        #[source]
        last_error: Option<io::Error>,
    },

    /// The operation needs an established connection and there is none.
    #[error("transport is not connected")]
    NotConnected,

    /// Fatal send error (peer reset, broken pipe, ...).
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    /// Fatal receive error (peer reset, ...).
    #[error("receive failed: {0}")]
    RecvFailed(#[source] io::Error),
}

/// Errors reported by a [`RandomSource`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RngError {
    /// The generator was used before seeding, or asked for zero bytes.
    #[error("random generator is not initialized for this request")]
    NotInitialized,

    /// The secure entropy source came up short and no fallback is permitted.
    #[error("secure entropy source produced {produced} of {requested} bytes")]
    GenerationFailed { requested: usize, produced: usize },
}

// ── Callback traits ───────────────────────────────────────────────────────────

/// The send/recv callback pair a secure-channel engine drives.
///
/// Implementations must never block waiting for a socket to become ready:
/// transient unavailability is reported as [`IoProgress::WantRead`] or
/// [`IoProgress::WantWrite`].
#[cfg_attr(test, mockall::automock)]
pub trait BioTransport {
    /// Writes as much of `buf` as the socket accepts right now.
    fn send(&mut self, buf: &[u8]) -> Result<IoProgress, TransportError>;

    /// Reads whatever is available right now into `buf`.
    fn recv(&mut self, buf: &mut [u8]) -> Result<IoProgress, TransportError>;
}

/// The random-byte callback a secure-channel engine drives.
pub trait RandomSource {
    /// Fills all of `out` with random bytes.
    fn random(&mut self, out: &mut [u8]) -> Result<(), RngError>;
}

// ── Call-site retry loops ─────────────────────────────────────────────────────

/// Sends all of `buf`, resubmitting partial writes and retrying on sentinels.
///
/// `wait` is called with the sentinel each time the transport reports one.
/// It should block until the socket is likely ready (or simply back off) and
/// may return an error to abandon the send.
///
/// # Errors
///
/// Propagates fatal transport errors and errors returned by `wait`.  A
/// transport that accepts zero bytes of a non-empty buffer is treated as
/// [`TransportError::SendFailed`].
pub fn send_all<B, W>(bio: &mut B, buf: &[u8], mut wait: W) -> Result<(), TransportError>
where
    B: BioTransport + ?Sized,
    W: FnMut(IoProgress) -> Result<(), TransportError>,
{
    let mut sent = 0;
    while sent < buf.len() {
        match bio.send(&buf[sent..])? {
            IoProgress::Transferred(0) => {
                return Err(TransportError::SendFailed(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "transport accepted zero bytes",
                )));
            }
            IoProgress::Transferred(n) => sent += n,
            retry => wait(retry)?,
        }
    }
    Ok(())
}

/// Receives at least one byte (or an orderly shutdown) into `buf`.
///
/// Returns the number of bytes read; `0` means the peer closed the
/// connection.
///
/// # Errors
///
/// Propagates fatal transport errors and errors returned by `wait`.
pub fn recv_some<B, W>(bio: &mut B, buf: &mut [u8], mut wait: W) -> Result<usize, TransportError>
where
    B: BioTransport + ?Sized,
    W: FnMut(IoProgress) -> Result<(), TransportError>,
{
    loop {
        match bio.recv(buf)? {
            IoProgress::Transferred(n) => return Ok(n),
            retry => wait(retry)?,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    #[test]
    fn test_is_retry_only_for_sentinels() {
        assert!(IoProgress::WantRead.is_retry());
        assert!(IoProgress::WantWrite.is_retry());
        assert!(!IoProgress::Transferred(0).is_retry());
        assert!(!IoProgress::Transferred(12).is_retry());
    }

    #[test]
    fn test_send_all_resubmits_remainder_after_partial_write() {
        // Arrange – the transport accepts 3 bytes, then the remaining 2
        let mut bio = MockBioTransport::new();
        let mut seq = Sequence::new();
        bio.expect_send()
            .withf(|buf: &[u8]| buf == b"hello")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(IoProgress::Transferred(3)));
        bio.expect_send()
            .withf(|buf: &[u8]| buf == b"lo")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(IoProgress::Transferred(2)));

        // Act
        let result = send_all(&mut bio, b"hello", |_| Ok(()));

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_send_all_waits_on_want_write_and_retries_same_buffer() {
        // Arrange
        let mut bio = MockBioTransport::new();
        let mut seq = Sequence::new();
        bio.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(IoProgress::WantWrite));
        bio.expect_send()
            .withf(|buf: &[u8]| buf == b"abc")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|buf| Ok(IoProgress::Transferred(buf.len())));
        let mut waits = Vec::new();

        // Act
        let result = send_all(&mut bio, b"abc", |p| {
            waits.push(p);
            Ok(())
        });

        // Assert
        assert!(result.is_ok());
        assert_eq!(waits, vec![IoProgress::WantWrite]);
    }

    #[test]
    fn test_send_all_propagates_fatal_error_without_retry() {
        // Arrange
        let mut bio = MockBioTransport::new();
        bio.expect_send().times(1).returning(|_| {
            Err(TransportError::SendFailed(io::Error::from(
                io::ErrorKind::BrokenPipe,
            )))
        });

        // Act
        let result = send_all(&mut bio, b"abc", |_| Ok(()));

        // Assert
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
    }

    #[test]
    fn test_send_all_treats_zero_byte_write_as_fatal() {
        let mut bio = MockBioTransport::new();
        bio.expect_send()
            .times(1)
            .returning(|_| Ok(IoProgress::Transferred(0)));

        let result = send_all(&mut bio, b"abc", |_| Ok(()));

        assert!(matches!(result, Err(TransportError::SendFailed(e)) if e.kind() == io::ErrorKind::WriteZero));
    }

    #[test]
    fn test_send_all_stops_when_wait_fails() {
        // Arrange – the caller gives up after the first sentinel
        let mut bio = MockBioTransport::new();
        bio.expect_send()
            .times(1)
            .returning(|_| Ok(IoProgress::WantWrite));

        // Act
        let result = send_all(&mut bio, b"abc", |_| Err(TransportError::NotConnected));

        // Assert
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[test]
    fn test_send_all_with_empty_buffer_never_calls_transport() {
        let mut bio = MockBioTransport::new();
        bio.expect_send().times(0);

        assert!(send_all(&mut bio, b"", |_| Ok(())).is_ok());
    }

    #[test]
    fn test_recv_some_retries_want_read_then_returns_bytes() {
        // Arrange
        let mut bio = MockBioTransport::new();
        let mut seq = Sequence::new();
        bio.expect_recv()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(IoProgress::WantRead));
        bio.expect_recv()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|buf: &mut [u8]| {
                buf[..3].copy_from_slice(b"xyz");
                Ok(IoProgress::Transferred(3))
            });
        let mut buf = [0u8; 16];
        let mut wait_count = 0;

        // Act
        let n = recv_some(&mut bio, &mut buf, |p| {
            assert_eq!(p, IoProgress::WantRead);
            wait_count += 1;
            Ok(())
        })
        .expect("recv_some");

        // Assert
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], b"xyz");
        assert_eq!(wait_count, 2);
    }

    #[test]
    fn test_recv_some_returns_zero_on_orderly_shutdown() {
        let mut bio = MockBioTransport::new();
        bio.expect_recv()
            .times(1)
            .returning(|_| Ok(IoProgress::Transferred(0)));
        let mut buf = [0u8; 8];

        let n = recv_some(&mut bio, &mut buf, |_| Ok(())).expect("recv_some");

        assert_eq!(n, 0, "zero bytes is an orderly shutdown, not an error");
    }

    #[test]
    fn test_recv_some_propagates_recv_failed() {
        let mut bio = MockBioTransport::new();
        bio.expect_recv().times(1).returning(|_| {
            Err(TransportError::RecvFailed(io::Error::from(
                io::ErrorKind::ConnectionReset,
            )))
        });
        let mut buf = [0u8; 8];

        let result = recv_some(&mut bio, &mut buf, |_| Ok(()));

        assert!(matches!(result, Err(TransportError::RecvFailed(_))));
    }

    #[test]
    fn test_transport_error_display_mentions_attempt_count() {
        let err = TransportError::ConnectFailed {
            attempted: 3,
            last_error: None,
        };
        assert!(err.to_string().contains('3'));
    }
}
