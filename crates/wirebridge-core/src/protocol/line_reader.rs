//! Growable line reader for the HTTP side of the opening handshake.
//!
//! Bytes are pushed in with [`LineReader::feed`] as they come off the
//! socket; [`LineReader::next_line`] hands back one complete line at a time
//! or `None` when more data is needed.  Lines may end in `\r\n` or a bare
//! `\n`.  There is no upper bound on line length.

use std::io::{self, Read};

use thiserror::Error;

/// Read size used by [`LineReader::read_line`].
const READ_CHUNK: usize = 512;

#[derive(Debug, Error)]
pub enum LineError {
    /// The stream ended after part of a line had been buffered.
    #[error("connection closed mid-line ({buffered} byte(s) buffered)")]
    UnexpectedEof { buffered: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8(#[source] std::str::Utf8Error),

    #[error("I/O error while reading line: {0}")]
    Io(#[source] io::Error),
}

/// Accumulates partial lines across reads.
#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet returned as part of a line.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the next complete line without its terminator, or `None` if
    /// the buffer does not contain a full line yet.
    pub fn next_line(&mut self) -> Result<Option<String>, LineError> {
        let Some(newline) = self.buf.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };

        let mut end = newline;
        if end > 0 && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        let line = std::str::from_utf8(&self.buf[..end])
            .map_err(LineError::InvalidUtf8)?
            .to_owned();
        self.buf.drain(..=newline);
        Ok(Some(line))
    }

    /// Call when the underlying stream reports end-of-file.
    ///
    /// With nothing buffered the stream ended on a line boundary and an
    /// empty line is returned.  Anything buffered is a truncated line.
    pub fn finish(&mut self) -> Result<String, LineError> {
        if self.buf.is_empty() {
            Ok(String::new())
        } else {
            Err(LineError::UnexpectedEof {
                buffered: self.buf.len(),
            })
        }
    }

    /// Consumes the reader, returning bytes that followed the last line.
    pub fn into_remaining(self) -> Vec<u8> {
        self.buf
    }

    /// Blocks on `reader` until a full line is available.
    ///
    /// Interrupted reads are retried.  End-of-file follows the rules of
    /// [`finish`](Self::finish).
    pub fn read_line<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<String, LineError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.next_line()? {
                return Ok(line);
            }
            match reader.read(&mut chunk) {
                Ok(0) => return self.finish(),
                Ok(n) => self.feed(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LineError::Io(e)),
            }
        }
    }
}
