//! Frame codec for the local socket protocol.
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! [u8 type] [u32 BE length] [payload: length bytes]
//! ```
//!
//! All multi-byte integers in frames and payloads are big-endian. The frame
//! layer knows nothing about commands; [`super::protocol`] interprets the
//! type byte and payload.
//!
//! Declared lengths are checked against their hard maximums before anything
//! proportional to them is read or allocated, so a hostile peer cannot make
//! the server reserve memory by lying in a header.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::constants::MAX_FRAME_PAYLOAD;

/// Size of the frame header: type byte plus length.
pub const HEADER_LEN: usize = 5;

/// Malformed or out-of-bounds wire data.
///
/// Always fatal to the connection that produced it, never to the server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A declared length or count exceeds its fixed maximum.
    #[error("{field} out of bounds: {declared} (max {max})")]
    OutOfBounds {
        /// Which field was violated.
        field: &'static str,
        /// The value the peer declared.
        declared: u64,
        /// The hard maximum for the field.
        max: usize,
    },

    /// A declared count is negative.
    #[error("{field} is negative: {value}")]
    NegativeCount {
        /// Which field was violated.
        field: &'static str,
        /// The value the peer declared.
        value: i64,
    },

    /// The payload ended before a field could be read.
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the next field requires.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// Bytes left over after the last field.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// Type byte not in the catalog.
    #[error("unknown frame type: 0x{0:02x}")]
    UnknownType(u8),

    /// A text field is not valid UTF-8.
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// An `Auth` payload that is not exactly one token long.
    #[error("auth token must be {expected} bytes, got {actual}")]
    InvalidTokenLength {
        /// Required token length.
        expected: usize,
        /// Length received.
        actual: usize,
    },
}

/// Failure while reading a frame from a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The transport failed (includes read timeouts and mid-frame EOF).
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent something the protocol rejects.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// One length-prefixed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Catalog type byte.
    pub frame_type: u8,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame from a type byte and payload.
    pub fn new(frame_type: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Create a frame with no payload.
    pub fn empty(frame_type: u8) -> Self {
        Self::new(frame_type, Vec::new())
    }

    /// Encode this frame into wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.frame_type);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Write this frame to `writer` in one `write_all`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode())?;
        writer.flush()
    }

    /// Read one frame from `reader`.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    /// A declared length above [`MAX_FRAME_PAYLOAD`] fails with
    /// [`ProtocolError::OutOfBounds`] before the payload is touched.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>, FrameError> {
        let mut header = [0u8; HEADER_LEN];

        // First byte separately so a clean disconnect is not an error.
        loop {
            match reader.read(&mut header[..1]) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        reader.read_exact(&mut header[1..])?;

        let frame_type = header[0];
        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        if length > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::OutOfBounds {
                field: "frame length",
                declared: u64::from(length),
                max: MAX_FRAME_PAYLOAD as usize,
            }
            .into());
        }

        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload)?;

        Ok(Some(Self {
            frame_type,
            payload,
        }))
    }
}

/// Bounds-checked cursor over a frame payload.
#[derive(Debug)]
pub(crate) struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// Read an `i32` element count and validate it.
    ///
    /// Rejects negative counts, counts above `max`, and counts whose
    /// elements cannot fit in what is left of the payload. Only after all
    /// three checks is it safe to size an allocation by the count.
    pub(crate) fn count(
        &mut self,
        field: &'static str,
        max: usize,
        element_size: usize,
    ) -> Result<usize, ProtocolError> {
        let raw = self.i32()?;
        if raw < 0 {
            return Err(ProtocolError::NegativeCount {
                field,
                value: i64::from(raw),
            });
        }
        let count = raw as usize;
        if count > max {
            return Err(ProtocolError::OutOfBounds {
                field,
                declared: count as u64,
                max,
            });
        }
        let needed = count * element_size;
        if needed > self.remaining() {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }

    /// Consume everything left.
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    /// Fail if any bytes are left unread.
    pub(crate) fn finish(self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}
