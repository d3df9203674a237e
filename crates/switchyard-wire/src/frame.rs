//! Frame prefix handling shared by request and response codecs.
//!
//! Every frame starts with a four-byte magic, a little-endian `u32` size that
//! counts every byte after the size field, and a one-byte version selector.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// Magic literal opening request frames (and historical v2 responses).
pub const REQUEST_MAGIC: [u8; 4] = *b"==>>";

/// Magic literal opening v3 and v4 response frames.
pub const RESPONSE_MAGIC: [u8; 4] = *b"<<==";

/// Bytes occupied by the magic and the size field.
pub const PREFIX_LEN: usize = 8;

/// Bytes required before a frame header can be inspected.
pub const HEADER_LEN: usize = PREFIX_LEN + 1;

/// Width of the zero-padded trace id slot in v2 and v3 frames.
pub const FIXED_TRACE_ID_LEN: usize = 32;

/// Width of the zero-padded span id slot in v3 requests.
pub const FIXED_SPAN_ID_LEN: usize = 16;

/// Protocol versions understood by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Version {
    /// Legacy layout with a 16-bit caller id and no tag or span ids.
    V2 = 2,
    /// Fixed-width trace and span ids plus a result code on responses.
    V3 = 3,
    /// Length-prefixed trace and span ids, render selector and header bytes.
    #[default]
    V4 = 4,
}

impl Version {
    /// Returns the on-wire version byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Fixed header bytes of a request after the size field.
    #[must_use]
    pub const fn min_request_size(self) -> usize {
        match self {
            // version, respond, callerId, actionLen, bodyLen, traceId
            Self::V2 => 1 + 1 + 2 + 1 + 4 + FIXED_TRACE_ID_LEN,
            // version, tagId, traceId, spanId, callerId, actionLen, respond
            Self::V3 => 1 + 4 + FIXED_TRACE_ID_LEN + FIXED_SPAN_ID_LEN + 4 + 1 + 1,
            // version, five length/flag bytes, callerId, tagId, headerLen, bodyLen
            Self::V4 => 1 + 5 + 4 + 4 + 4 + 4,
        }
    }

    /// Fixed header bytes of a response after the size field.
    #[must_use]
    pub const fn min_response_size(self) -> usize {
        match self {
            Self::V2 => 1 + 4 + FIXED_TRACE_ID_LEN,
            Self::V3 => 1 + 4 + FIXED_TRACE_ID_LEN + 4,
            Self::V4 => 1 + 1 + 1 + 4 + 4,
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = WireError;

    fn try_from(version: u8) -> Result<Self, Self::Error> {
        match version {
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            _ => Err(WireError::UnknownVersion { version }),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "v{}", self.as_u8())
    }
}

/// Direction of a frame, which decides the accepted magic literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

/// Prefix of a frame that has at least [`HEADER_LEN`] bytes available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Magic literal the frame opened with.
    pub magic: [u8; 4],
    /// Declared size of everything after the size field.
    pub size: u32,
    /// Protocol version of the frame.
    pub version: Version,
}

impl FrameHeader {
    /// Total bytes the frame occupies on the wire, prefix included.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        PREFIX_LEN.saturating_add(self.size as usize)
    }
}

/// Validates the prefix of the next frame in `buf`.
///
/// Returns `Ok(None)` while fewer than [`HEADER_LEN`] bytes are buffered. The
/// magic is checked as soon as four bytes are present so garbage is rejected
/// before waiting on a size that will never arrive. Request frames accept the
/// response literal only for v2, matching historical peers.
///
/// # Errors
///
/// Returns a [`WireError`] for an unknown magic or version, or when the
/// declared size cannot hold the fixed header of the version.
pub fn peek_frame(buf: &[u8], kind: FrameKind) -> Result<Option<FrameHeader>, WireError> {
    let Some(magic_bytes) = buf.get(..4) else {
        return Ok(None);
    };
    let mut magic = [0_u8; 4];
    magic.copy_from_slice(magic_bytes);
    if magic != REQUEST_MAGIC && magic != RESPONSE_MAGIC {
        return Err(WireError::BadMagic { found: magic });
    }

    let Some(mut prefix) = buf.get(4..HEADER_LEN) else {
        return Ok(None);
    };
    let size = prefix.get_u32_le();
    let raw_version = prefix.get_u8();
    if size == 0 {
        return Err(WireError::Truncated {
            version: raw_version,
            size,
            minimum: 1,
        });
    }
    let version = Version::try_from(raw_version)?;
    if kind == FrameKind::Request && magic == RESPONSE_MAGIC && version != Version::V2 {
        return Err(WireError::BadMagic { found: magic });
    }

    let minimum = match kind {
        FrameKind::Request => version.min_request_size(),
        FrameKind::Response => version.min_response_size(),
    };
    if (size as usize) < minimum {
        return Err(WireError::Truncated {
            version: raw_version,
            size,
            minimum,
        });
    }

    Ok(Some(FrameHeader {
        magic,
        size,
        version,
    }))
}

/// Returns the header and the bytes after the size field once the whole frame
/// is buffered.
pub(crate) fn complete_frame(
    buf: &[u8],
    kind: FrameKind,
) -> Result<Option<(FrameHeader, &[u8])>, WireError> {
    let Some(header) = peek_frame(buf, kind)? else {
        return Ok(None);
    };
    Ok(buf
        .get(PREFIX_LEN..header.frame_len())
        .map(|payload| (header, payload)))
}

/// Wraps an encoded payload (version byte onwards) in magic and size.
pub(crate) fn seal(magic: [u8; 4], payload: &[u8]) -> Result<Bytes, WireError> {
    let size = u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        len: payload.len(),
    })?;
    let mut frame = BytesMut::with_capacity(PREFIX_LEN + payload.len());
    frame.put_slice(&magic);
    frame.put_u32_le(size);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Writes `value` into a fixed-width slot, zero-padding the tail.
pub(crate) fn put_padded(
    buf: &mut BytesMut,
    field: &'static str,
    value: &[u8],
    width: usize,
    version: Version,
) -> Result<(), WireError> {
    if value.len() > width {
        return Err(WireError::too_long(field, value.len(), width, version.as_u8()));
    }
    buf.put_slice(value);
    buf.put_bytes(0, width - value.len());
    Ok(())
}

/// Length of a variable field that must fit a one-byte length prefix.
pub(crate) fn short_len(
    field: &'static str,
    value: &[u8],
    version: Version,
) -> Result<u8, WireError> {
    u8::try_from(value.len())
        .map_err(|_| WireError::too_long(field, value.len(), u8::MAX.into(), version.as_u8()))
}

/// Length of a variable field that must fit a four-byte length prefix.
pub(crate) fn long_len(
    field: &'static str,
    value: &[u8],
    version: Version,
) -> Result<u32, WireError> {
    u32::try_from(value.len()).map_err(|_| {
        WireError::too_long(field, value.len(), u32::MAX as usize, version.as_u8())
    })
}

/// Drops the zero padding of a fixed-width slot.
pub(crate) fn trim_padding(raw: &[u8]) -> &[u8] {
    let logical = raw.iter().rposition(|byte| *byte != 0).map_or(0, |last| last + 1);
    raw.get(..logical).unwrap_or_default()
}

/// Bounds-checked cursor over the bytes after the size field.
pub(crate) struct FieldReader<'a> {
    rest: &'a [u8],
    offset: usize,
    size: u32,
}

impl<'a> FieldReader<'a> {
    pub(crate) const fn new(payload: &'a [u8], size: u32) -> Self {
        Self {
            rest: payload,
            offset: 0,
            size,
        }
    }

    pub(crate) fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.offset.saturating_add(len);
        if len > self.rest.len() {
            return Err(WireError::Overrun {
                field,
                end,
                size: self.size,
            });
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        self.offset = end;
        Ok(head)
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, WireError> {
        let mut raw = self.take(field, 1)?;
        Ok(raw.get_u8())
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16, WireError> {
        let mut raw = self.take(field, 2)?;
        Ok(raw.get_u16_le())
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, WireError> {
        let mut raw = self.take(field, 4)?;
        Ok(raw.get_u32_le())
    }

    pub(crate) fn i32(&mut self, field: &'static str) -> Result<i32, WireError> {
        let mut raw = self.take(field, 4)?;
        Ok(raw.get_i32_le())
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = self.rest;
        self.offset = self.offset.saturating_add(rest.len());
        self.rest = &[];
        rest
    }
}
