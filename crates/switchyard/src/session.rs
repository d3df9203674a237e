//! Per-connection frame reassembly.
//!
//! A [`SessionBuffer`] owns the surplus bytes read from one connection (or one
//! QUIC stream, or one WebSocket). Reads are appended at the tail and whole
//! frames are split off the head, one at a time, so any trailing bytes of the
//! next frame stay buffered for the following read.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use switchyard_config::ListenerKind;
use switchyard_wire::{FrameKind, Version, WireError, peek_frame};

const INITIAL_CAPACITY: usize = 4096;

/// Errors that end a session. The stream cannot be resynchronised after any
/// of these.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The frame prefix was malformed.
    #[error("malformed frame prefix: {source}")]
    Framing {
        /// Underlying codec error.
        #[from]
        source: WireError,
    },
    /// The declared frame exceeds the configured limit.
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Declared frame length including the prefix.
        len: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// Accumulator that stitches partial reads into complete frames.
#[derive(Debug)]
pub struct SessionBuffer {
    surplus: BytesMut,
    kind: FrameKind,
    max_frame_bytes: usize,
    version: Option<Version>,
}

impl SessionBuffer {
    /// Creates an empty buffer expecting frames of `kind`.
    #[must_use]
    pub fn new(kind: FrameKind, max_frame_bytes: usize) -> Self {
        Self {
            surplus: BytesMut::with_capacity(INITIAL_CAPACITY),
            kind,
            max_frame_bytes,
            version: None,
        }
    }

    /// Appends freshly read bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.surplus.extend_from_slice(bytes);
    }

    /// Tail of the buffer for `AsyncReadExt::read_buf`.
    pub fn read_buf_mut(&mut self) -> &mut BytesMut {
        &mut self.surplus
    }

    /// Splits the next complete frame off the head of the buffer.
    ///
    /// Returns `Ok(None)` while the frame is still incomplete; the buffered
    /// bytes are left untouched in that case.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] when the prefix is invalid or declares a
    /// frame larger than the configured limit.
    pub fn try_extract_frame(&mut self) -> Result<Option<Bytes>, SessionError> {
        let Some(header) = peek_frame(&self.surplus, self.kind)? else {
            return Ok(None);
        };
        let len = header.frame_len();
        if len > self.max_frame_bytes {
            return Err(SessionError::FrameTooLarge {
                len,
                limit: self.max_frame_bytes,
            });
        }
        if self.surplus.len() < len {
            return Ok(None);
        }
        self.version.get_or_insert(header.version);
        Ok(Some(self.surplus.split_to(len).freeze()))
    }

    /// Protocol version of the first frame seen.
    #[must_use]
    pub const fn version(&self) -> Option<Version> {
        self.version
    }

    /// Number of bytes waiting for the next frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.surplus.len()
    }

    /// Whether no bytes are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.surplus.is_empty()
    }
}

/// Identity of a connection as seen by hooks and logs.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Listener instance that accepted the connection.
    pub instance: Arc<str>,
    /// Transport of the listener.
    pub kind: ListenerKind,
    /// Remote address when the transport exposes one.
    pub peer: Option<SocketAddr>,
}

/// State owned by the receive task of one connection or stream.
#[derive(Debug)]
pub struct Session {
    info: ConnectionInfo,
    buffer: SessionBuffer,
    token: CancellationToken,
}

impl Session {
    /// Creates a session for an accepted request stream.
    #[must_use]
    pub fn new(info: ConnectionInfo, max_frame_bytes: usize, token: CancellationToken) -> Self {
        Self {
            info,
            buffer: SessionBuffer::new(FrameKind::Request, max_frame_bytes),
            token,
        }
    }

    /// Connection identity.
    #[must_use]
    pub const fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Reassembly buffer.
    pub fn buffer_mut(&mut self) -> &mut SessionBuffer {
        &mut self.buffer
    }

    /// Token cancelled when the owning listener shuts down.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use switchyard_wire::{Request, encode_request};

    fn frame(action: &str, body: &[u8]) -> Bytes {
        let request = Request::new(Version::V4, action)
            .with_trace_id(b"trace".to_vec())
            .with_body(body.to_vec());
        encode_request(&request).expect("encode request")
    }

    #[fixture]
    fn buffer() -> SessionBuffer {
        SessionBuffer::new(FrameKind::Request, 1 << 20)
    }

    #[rstest]
    fn byte_at_a_time_yields_one_identical_frame(mut buffer: SessionBuffer) {
        let encoded = frame("user.get", b"{\"id\":1}");
        let mut extracted = Vec::new();
        for byte in encoded.iter() {
            buffer.append(&[*byte]);
            if let Some(frame) = buffer.try_extract_frame().expect("valid prefix") {
                extracted.push(frame);
            }
        }
        assert_eq!(extracted, vec![encoded]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.version(), Some(Version::V4));
    }

    #[rstest]
    fn burst_yields_every_resident_frame(mut buffer: SessionBuffer) {
        let first = frame("a", b"1");
        let second = frame("b", b"22");
        let third = frame("c", b"");
        let mut burst = Vec::new();
        burst.extend_from_slice(&first);
        burst.extend_from_slice(&second);
        burst.extend_from_slice(&third);
        buffer.append(&burst);

        assert_eq!(buffer.try_extract_frame().expect("first"), Some(first));
        assert_eq!(buffer.try_extract_frame().expect("second"), Some(second));
        assert_eq!(buffer.try_extract_frame().expect("third"), Some(third));
        assert_eq!(buffer.try_extract_frame().expect("drained"), None);
    }

    #[rstest]
    fn partial_tail_is_retained(mut buffer: SessionBuffer) {
        let first = frame("a", b"one");
        let second = frame("b", b"two");
        let mut bytes = first.to_vec();
        bytes.extend_from_slice(second.get(..5).expect("prefix"));
        buffer.append(&bytes);

        assert_eq!(buffer.try_extract_frame().expect("first"), Some(first));
        assert_eq!(buffer.try_extract_frame().expect("incomplete"), None);
        assert_eq!(buffer.buffered(), 5);

        buffer.append(second.get(5..).expect("suffix"));
        assert_eq!(buffer.try_extract_frame().expect("second"), Some(second));
    }

    #[rstest]
    fn bad_magic_is_fatal(mut buffer: SessionBuffer) {
        buffer.append(b"GET / HTTP/1.1\r\n");
        assert!(matches!(
            buffer.try_extract_frame(),
            Err(SessionError::Framing {
                source: WireError::BadMagic { .. }
            })
        ));
    }

    #[test]
    fn oversized_frames_are_rejected_before_buffering() {
        let mut buffer = SessionBuffer::new(FrameKind::Request, 64);
        let encoded = frame("big", &[7_u8; 128]);
        buffer.append(encoded.get(..16).expect("prefix"));
        assert!(matches!(
            buffer.try_extract_frame(),
            Err(SessionError::FrameTooLarge { limit: 64, .. })
        ));
    }
}
