//! Response envelope and its per-version layouts.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{
    FIXED_TRACE_ID_LEN, FieldReader, FrameKind, REQUEST_MAGIC, RESPONSE_MAGIC, Version,
    complete_frame, long_len, put_padded, seal, short_len, trim_padding,
};
use crate::{Request, WireError};

/// Decoded response envelope.
///
/// Only v3 carries the tag id. v2 responses also lack the result code and
/// render selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Protocol version the response travels with.
    pub version: Version,
    /// Trace identifier echoed from the request.
    pub trace_id: Bytes,
    /// Tag echoed from the request.
    pub tag_id: u32,
    /// Zero on success, otherwise a failure code.
    pub result_code: i32,
    /// Render selector (v4).
    pub render: u8,
    /// Rendered output.
    pub body: Bytes,
}

impl Response {
    /// Starts a response that echoes the identifiers of `request`.
    #[must_use]
    pub fn reply_to(request: &Request) -> Self {
        Self {
            version: request.version,
            trace_id: request.trace_id.clone(),
            tag_id: request.tag_id,
            render: request.render,
            ..Self::default()
        }
    }

    /// Sets the result code.
    #[must_use]
    pub const fn with_result_code(mut self, result_code: i32) -> Self {
        self.result_code = result_code;
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Encodes `response` into a complete frame.
///
/// v2 frames open with the request literal as deployed v2 peers expect;
/// later versions use [`RESPONSE_MAGIC`].
///
/// # Errors
///
/// Returns [`WireError::FieldTooLong`] when a field exceeds its slot in the
/// selected version, or [`WireError::FrameTooLarge`] for frames beyond the
/// 32-bit size prefix.
pub fn encode_response(response: &Response) -> Result<Bytes, WireError> {
    let version = response.version;
    let mut payload = BytesMut::with_capacity(
        version.min_response_size() + response.trace_id.len() + response.body.len(),
    );
    payload.put_u8(version.as_u8());

    let magic = match version {
        Version::V2 => {
            payload.put_u32_le(long_len("body", &response.body, version)?);
            put_padded(
                &mut payload,
                "trace_id",
                &response.trace_id,
                FIXED_TRACE_ID_LEN,
                version,
            )?;
            payload.put_slice(&response.body);
            REQUEST_MAGIC
        }
        Version::V3 => {
            payload.put_u32_le(response.tag_id);
            put_padded(
                &mut payload,
                "trace_id",
                &response.trace_id,
                FIXED_TRACE_ID_LEN,
                version,
            )?;
            payload.put_i32_le(response.result_code);
            payload.put_slice(&response.body);
            RESPONSE_MAGIC
        }
        Version::V4 => {
            payload.put_u8(response.render);
            payload.put_u8(short_len("trace_id", &response.trace_id, version)?);
            payload.put_i32_le(response.result_code);
            payload.put_u32_le(long_len("body", &response.body, version)?);
            payload.put_slice(&response.trace_id);
            payload.put_slice(&response.body);
            RESPONSE_MAGIC
        }
    };

    seal(magic, &payload)
}

/// Decodes the response frame at the start of `buf`.
///
/// Both magic literals are accepted for every version.
///
/// # Errors
///
/// Returns a [`WireError`] for framing violations.
pub fn decode_response(buf: &[u8]) -> Result<Option<(Response, usize)>, WireError> {
    let Some((header, payload)) = complete_frame(buf, FrameKind::Response)? else {
        return Ok(None);
    };
    let mut reader = FieldReader::new(payload, header.size);
    reader.u8("version")?;

    let response = match header.version {
        Version::V2 => {
            let body_len = reader.u32("body_len")?;
            let trace_id = trim_padding(reader.take("trace_id", FIXED_TRACE_ID_LEN)?);
            let body = reader.take("body", body_len as usize)?;
            Response {
                version: Version::V2,
                trace_id: Bytes::copy_from_slice(trace_id),
                body: Bytes::copy_from_slice(body),
                ..Response::default()
            }
        }
        Version::V3 => {
            let tag_id = reader.u32("tag_id")?;
            let trace_id = trim_padding(reader.take("trace_id", FIXED_TRACE_ID_LEN)?);
            let result_code = reader.i32("result_code")?;
            let body = reader.rest();
            Response {
                version: Version::V3,
                trace_id: Bytes::copy_from_slice(trace_id),
                tag_id,
                result_code,
                body: Bytes::copy_from_slice(body),
                ..Response::default()
            }
        }
        Version::V4 => {
            let render = reader.u8("render")?;
            let trace_len = reader.u8("trace_id_len")?;
            let result_code = reader.i32("result_code")?;
            let body_len = reader.u32("body_len")?;
            let trace_id = reader.take("trace_id", trace_len.into())?;
            let body = reader.take("body", body_len as usize)?;
            Response {
                version: Version::V4,
                trace_id: Bytes::copy_from_slice(trace_id),
                result_code,
                render,
                body: Bytes::copy_from_slice(body),
                ..Response::default()
            }
        }
    };
    Ok(Some((response, header.frame_len())))
}
