//! Request envelope and its per-version layouts.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{
    FIXED_SPAN_ID_LEN, FIXED_TRACE_ID_LEN, FieldReader, FrameKind, REQUEST_MAGIC, Version,
    complete_frame, long_len, put_padded, seal, short_len, trim_padding,
};
use crate::WireError;

/// Decoded request envelope.
///
/// Fields a version cannot carry are dropped on encode and come back as
/// their defaults on decode: v2 has no tag id, span id, render selector or
/// header, and v3 has no render selector or header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Protocol version the request travels with.
    pub version: Version,
    /// Whether the caller waits for a response frame.
    pub respond: bool,
    /// Identifier of the calling service. v2 carries only 16 bits.
    pub caller_id: u32,
    /// Caller-chosen tag echoed back on the response.
    pub tag_id: u32,
    /// Trace identifier used to correlate the response.
    pub trace_id: Bytes,
    /// Span path inside the trace.
    pub span_id: Bytes,
    /// Render selector (v4).
    pub render: u8,
    /// Name of the action to invoke.
    pub action: String,
    /// Opaque header bytes (v4).
    pub header: Bytes,
    /// Opaque request body.
    pub body: Bytes,
}

impl Request {
    /// Builds a request for `action` that expects a response.
    #[must_use]
    pub fn new(version: Version, action: impl Into<String>) -> Self {
        Self {
            version,
            respond: true,
            action: action.into(),
            ..Self::default()
        }
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Replaces the trace id.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<Bytes>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}

/// Encodes `request` into a complete frame.
///
/// # Errors
///
/// Returns [`WireError::FieldTooLong`] when a field exceeds its slot in the
/// selected version, or [`WireError::FrameTooLarge`] for frames beyond the
/// 32-bit size prefix.
pub fn encode_request(request: &Request) -> Result<Bytes, WireError> {
    let version = request.version;
    let action = request.action.as_bytes();
    let mut payload = BytesMut::with_capacity(
        version.min_request_size()
            + action.len()
            + request.trace_id.len()
            + request.span_id.len()
            + request.header.len()
            + request.body.len(),
    );
    payload.put_u8(version.as_u8());

    match version {
        Version::V2 => {
            let caller_id =
                u16::try_from(request.caller_id).map_err(|_| WireError::OutOfRange {
                    field: "caller_id",
                    value: request.caller_id.into(),
                    max: u16::MAX.into(),
                    version: version.as_u8(),
                })?;
            payload.put_u8(u8::from(request.respond));
            payload.put_u16_le(caller_id);
            payload.put_u8(short_len("action", action, version)?);
            payload.put_u32_le(long_len("body", &request.body, version)?);
            put_padded(
                &mut payload,
                "trace_id",
                &request.trace_id,
                FIXED_TRACE_ID_LEN,
                version,
            )?;
            payload.put_slice(action);
            payload.put_slice(&request.body);
        }
        Version::V3 => {
            payload.put_u32_le(request.tag_id);
            put_padded(
                &mut payload,
                "trace_id",
                &request.trace_id,
                FIXED_TRACE_ID_LEN,
                version,
            )?;
            put_padded(
                &mut payload,
                "span_id",
                &request.span_id,
                FIXED_SPAN_ID_LEN,
                version,
            )?;
            payload.put_u32_le(request.caller_id);
            payload.put_u8(short_len("action", action, version)?);
            payload.put_u8(u8::from(request.respond));
            payload.put_slice(action);
            payload.put_slice(&request.body);
        }
        Version::V4 => {
            payload.put_u8(short_len("action", action, version)?);
            payload.put_u8(u8::from(request.respond));
            payload.put_u8(request.render);
            payload.put_u8(short_len("trace_id", &request.trace_id, version)?);
            payload.put_u8(short_len("span_id", &request.span_id, version)?);
            payload.put_u32_le(request.caller_id);
            payload.put_u32_le(request.tag_id);
            payload.put_u32_le(long_len("header", &request.header, version)?);
            payload.put_u32_le(long_len("body", &request.body, version)?);
            payload.put_slice(action);
            payload.put_slice(&request.trace_id);
            payload.put_slice(&request.span_id);
            payload.put_slice(&request.header);
            payload.put_slice(&request.body);
        }
    }

    seal(REQUEST_MAGIC, &payload)
}

/// Decodes the request frame at the start of `buf`.
///
/// Returns `Ok(None)` until the whole frame is buffered, otherwise the
/// request and the number of bytes it occupied.
///
/// # Errors
///
/// Returns a [`WireError`] for framing violations; the stream cannot be
/// resynchronised afterwards.
pub fn decode_request(buf: &[u8]) -> Result<Option<(Request, usize)>, WireError> {
    let Some((header, payload)) = complete_frame(buf, FrameKind::Request)? else {
        return Ok(None);
    };
    let mut reader = FieldReader::new(payload, header.size);
    reader.u8("version")?;

    let request = match header.version {
        Version::V2 => decode_v2(&mut reader)?,
        Version::V3 => decode_v3(&mut reader)?,
        Version::V4 => decode_v4(&mut reader)?,
    };
    Ok(Some((request, header.frame_len())))
}

fn decode_v2(reader: &mut FieldReader<'_>) -> Result<Request, WireError> {
    let respond = reader.u8("respond")? == 1;
    let caller_id = reader.u16("caller_id")?;
    let action_len = reader.u8("action_len")?;
    let body_len = reader.u32("body_len")?;
    let trace_id = trim_padding(reader.take("trace_id", FIXED_TRACE_ID_LEN)?);
    let action = action_name(reader.take("action", action_len.into())?)?;
    let body = reader.take("body", body_len as usize)?;
    Ok(Request {
        version: Version::V2,
        respond,
        caller_id: caller_id.into(),
        trace_id: Bytes::copy_from_slice(trace_id),
        action,
        body: Bytes::copy_from_slice(body),
        ..Request::default()
    })
}

fn decode_v3(reader: &mut FieldReader<'_>) -> Result<Request, WireError> {
    let tag_id = reader.u32("tag_id")?;
    let trace_id = trim_padding(reader.take("trace_id", FIXED_TRACE_ID_LEN)?);
    let span_id = trim_padding(reader.take("span_id", FIXED_SPAN_ID_LEN)?);
    let caller_id = reader.u32("caller_id")?;
    let action_len = reader.u8("action_len")?;
    let respond = reader.u8("respond")? == 1;
    let action = action_name(reader.take("action", action_len.into())?)?;
    let body = reader.rest();
    Ok(Request {
        version: Version::V3,
        respond,
        caller_id,
        tag_id,
        trace_id: Bytes::copy_from_slice(trace_id),
        span_id: Bytes::copy_from_slice(span_id),
        action,
        body: Bytes::copy_from_slice(body),
        ..Request::default()
    })
}

fn decode_v4(reader: &mut FieldReader<'_>) -> Result<Request, WireError> {
    let action_len = reader.u8("action_len")?;
    let respond = reader.u8("respond")? == 1;
    let render = reader.u8("render")?;
    let trace_len = reader.u8("trace_id_len")?;
    let span_len = reader.u8("span_id_len")?;
    let caller_id = reader.u32("caller_id")?;
    let tag_id = reader.u32("tag_id")?;
    let header_len = reader.u32("header_len")?;
    let body_len = reader.u32("body_len")?;
    let action = action_name(reader.take("action", action_len.into())?)?;
    let trace_id = reader.take("trace_id", trace_len.into())?;
    let span_id = reader.take("span_id", span_len.into())?;
    let header = reader.take("header", header_len as usize)?;
    let body = reader.take("body", body_len as usize)?;
    Ok(Request {
        version: Version::V4,
        respond,
        caller_id,
        tag_id,
        trace_id: Bytes::copy_from_slice(trace_id),
        span_id: Bytes::copy_from_slice(span_id),
        render,
        action,
        header: Bytes::copy_from_slice(header),
        body: Bytes::copy_from_slice(body),
    })
}

fn action_name(raw: &[u8]) -> Result<String, WireError> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| WireError::InvalidAction)
}
