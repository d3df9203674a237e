//! Tests for [`encode_response`] and [`decode_response`].

use bytes::Bytes;
use rstest::rstest;

use crate::{
    FIXED_TRACE_ID_LEN, REQUEST_MAGIC, RESPONSE_MAGIC, Request, Response, Version, WireError,
    decode_response, encode_response,
};

fn decode_whole(frame: &[u8]) -> Response {
    let (response, consumed) = decode_response(frame)
        .expect("frame decodes")
        .expect("frame complete");
    assert_eq!(consumed, frame.len());
    response
}

#[rstest]
#[case::v2(Version::V2, REQUEST_MAGIC)]
#[case::v3(Version::V3, RESPONSE_MAGIC)]
#[case::v4(Version::V4, RESPONSE_MAGIC)]
fn encoder_picks_the_magic_per_version(#[case] version: Version, #[case] magic: [u8; 4]) {
    let response = Response {
        version,
        ..Response::default()
    };
    let frame = encode_response(&response).expect("encode");
    assert_eq!(&frame[..4], &magic);
}

#[rstest]
#[case::v3(Response {
    version: Version::V3,
    trace_id: Bytes::from(vec![b'x'; FIXED_TRACE_ID_LEN]),
    tag_id: 11,
    result_code: -3,
    body: Bytes::from_static(b"{\"ok\":false}"),
    ..Response::default()
})]
#[case::v4(Response {
    version: Version::V4,
    trace_id: Bytes::from(vec![b'y'; 255]),
    result_code: 404,
    render: 1,
    body: Bytes::new(),
    ..Response::default()
})]
#[case::v2(Response {
    version: Version::V2,
    trace_id: Bytes::from_static(b"abc"),
    body: Bytes::from_static(b"legacy"),
    ..Response::default()
})]
fn responses_survive_encoding(#[case] response: Response) {
    let frame = encode_response(&response).expect("encode");
    assert_eq!(decode_whole(&frame), response);
}

#[test]
fn reply_echoes_request_identifiers() {
    let request = Request {
        tag_id: 77,
        render: 3,
        ..Request::new(Version::V4, "a").with_trace_id(Bytes::from_static(b"trace-1"))
    };
    let response = Response::reply_to(&request).with_result_code(500);

    assert_eq!(response.version, Version::V4);
    assert_eq!(response.trace_id.as_ref(), b"trace-1");
    assert_eq!(response.tag_id, 77);
    assert_eq!(response.render, 3);
    assert_eq!(response.result_code, 500);
}

#[test]
fn v3_response_accepts_the_request_literal() {
    let response = Response {
        version: Version::V3,
        result_code: 1,
        ..Response::default()
    };
    let mut frame = encode_response(&response).expect("encode").to_vec();
    frame[..4].copy_from_slice(&REQUEST_MAGIC);

    assert_eq!(decode_whole(&frame), response);
}

#[test]
fn truncated_v2_body_length_is_rejected() {
    let response = Response {
        version: Version::V2,
        body: Bytes::from_static(b"abc"),
        ..Response::default()
    };
    let mut frame = encode_response(&response).expect("encode").to_vec();
    frame[9..13].copy_from_slice(&100_u32.to_le_bytes());

    assert!(matches!(
        decode_response(&frame),
        Err(WireError::Overrun { field: "body", .. })
    ));
}

#[test]
fn v4_trace_id_longer_than_a_byte_is_rejected() {
    let response = Response {
        version: Version::V4,
        trace_id: Bytes::from(vec![0; 256]),
        ..Response::default()
    };
    assert!(matches!(
        encode_response(&response),
        Err(WireError::FieldTooLong {
            field: "trace_id",
            ..
        })
    ));
}
