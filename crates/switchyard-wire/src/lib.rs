//! Binary frame codec for the switchyard protocol.
//!
//! The protocol carries request and response envelopes in little-endian
//! frames. Each frame opens with a four-byte magic, a `u32` size counting all
//! bytes after the size field, and a version byte selecting one of three
//! layouts:
//!
//! - **v2**: 16-bit caller id, fixed 32-byte trace id, no result code.
//! - **v3**: tag id, fixed 32-byte trace id and 16-byte span id, result code.
//! - **v4**: length-prefixed ids, render selector and opaque header bytes.
//!
//! Decoders never block: they return `Ok(None)` until a whole frame is
//! buffered, and report the consumed length alongside the envelope so callers
//! can keep any trailing bytes for the next frame.

mod error;
mod frame;
mod request;
mod response;

pub use error::WireError;
pub use frame::{
    FIXED_SPAN_ID_LEN, FIXED_TRACE_ID_LEN, FrameHeader, FrameKind, HEADER_LEN, PREFIX_LEN,
    REQUEST_MAGIC, RESPONSE_MAGIC, Version, peek_frame,
};
pub use request::{Request, decode_request, encode_request};
pub use response::{Response, decode_response, encode_response};

#[cfg(test)]
mod tests;
