//! Tests for [`encode_request`] and [`decode_request`].

use bytes::Bytes;
use rstest::{fixture, rstest};

use crate::{
    FIXED_SPAN_ID_LEN, FIXED_TRACE_ID_LEN, PREFIX_LEN, Request, Version, WireError,
    decode_request, encode_request,
};

#[fixture]
fn user_get() -> Request {
    Request {
        version: Version::V3,
        respond: true,
        caller_id: 7,
        trace_id: Bytes::from(vec![b't'; FIXED_TRACE_ID_LEN]),
        span_id: Bytes::from_static(&[1]),
        action: "user.get".to_owned(),
        body: Bytes::from_static(br#"{"id":1}"#),
        ..Request::default()
    }
}

fn decode_whole(frame: &[u8]) -> Request {
    let (request, consumed) = decode_request(frame)
        .expect("frame decodes")
        .expect("frame complete");
    assert_eq!(consumed, frame.len());
    request
}

#[rstest]
fn v3_layout_matches_the_deployed_format(user_get: Request) {
    let frame = encode_request(&user_get).expect("encode");

    assert_eq!(&frame[..4], b"==>>");
    assert_eq!(&frame[4..8], &75_u32.to_le_bytes());
    assert_eq!(frame[8], 3);
    assert_eq!(&frame[9..13], &[0, 0, 0, 0]);
    assert_eq!(&frame[13..45], &[b't'; FIXED_TRACE_ID_LEN]);
    assert_eq!(frame[45], 1);
    assert!(frame[46..61].iter().all(|byte| *byte == 0));
    assert_eq!(&frame[61..65], &7_u32.to_le_bytes());
    assert_eq!(frame[65], 8);
    assert_eq!(frame[66], 1);
    assert_eq!(&frame[67..75], b"user.get");
    assert_eq!(&frame[75..], br#"{"id":1}"#);
}

#[rstest]
fn v3_span_id_padding_is_trimmed_on_decode(user_get: Request) {
    let frame = encode_request(&user_get).expect("encode");
    let decoded = decode_whole(&frame);

    assert_eq!(decoded.span_id.as_ref(), &[1_u8]);
    assert_eq!(decoded, user_get);
}

#[rstest]
#[case::v2(Version::V2)]
#[case::v3(Version::V3)]
#[case::v4(Version::V4)]
fn empty_action_and_body_survive(#[case] version: Version) {
    let request = Request {
        version,
        respond: false,
        ..Request::default()
    };
    let frame = encode_request(&request).expect("encode");
    assert_eq!(decode_whole(&frame), request);
}

#[rstest]
#[case::v2(Version::V2, FIXED_TRACE_ID_LEN, 0)]
#[case::v3(Version::V3, FIXED_TRACE_ID_LEN, FIXED_SPAN_ID_LEN)]
#[case::v4(Version::V4, 255, 255)]
fn maximum_length_ids_survive(
    #[case] version: Version,
    #[case] trace_len: usize,
    #[case] span_len: usize,
) {
    let request = Request {
        version,
        respond: true,
        caller_id: 513,
        tag_id: if version == Version::V2 { 0 } else { 42 },
        trace_id: Bytes::from(vec![b'a'; trace_len]),
        span_id: Bytes::from(vec![b'b'; span_len]),
        action: "orders.list".to_owned(),
        body: Bytes::from_static(b"payload"),
        ..Request::default()
    };
    let frame = encode_request(&request).expect("encode");
    assert_eq!(decode_whole(&frame), request);
}

#[test]
fn v4_carries_render_and_header() {
    let request = Request {
        version: Version::V4,
        respond: true,
        render: 2,
        caller_id: u32::MAX,
        tag_id: 9,
        trace_id: Bytes::from_static(b"trace"),
        span_id: Bytes::from_static(b"0.1.2"),
        action: "cart.add".to_owned(),
        header: Bytes::from_static(b"h=1"),
        body: Bytes::from_static(b"{}"),
    };
    let frame = encode_request(&request).expect("encode");
    assert_eq!(decode_whole(&frame), request);
}

#[test]
fn v2_drops_fields_it_cannot_carry() {
    let request = Request {
        version: Version::V2,
        tag_id: 5,
        span_id: Bytes::from_static(b"span"),
        render: 1,
        header: Bytes::from_static(b"header"),
        ..Request::new(Version::V2, "legacy.call")
    };
    let frame = encode_request(&request).expect("encode");
    let decoded = decode_whole(&frame);

    assert_eq!(decoded.action, "legacy.call");
    assert_eq!(decoded.tag_id, 0);
    assert!(decoded.span_id.is_empty());
    assert!(decoded.header.is_empty());
    assert_eq!(decoded.render, 0);
}

#[rstest]
fn partial_frames_need_more_bytes(user_get: Request) {
    let frame = encode_request(&user_get).expect("encode");
    for end in 0..frame.len() {
        assert_eq!(
            decode_request(&frame[..end]),
            Ok(None),
            "prefix of {end} bytes"
        );
    }
}

#[rstest]
fn trailing_bytes_are_not_consumed(user_get: Request) {
    let frame = encode_request(&user_get).expect("encode");
    let mut buf = frame.to_vec();
    buf.extend_from_slice(b"==>>");

    let (_, consumed) = decode_request(&buf)
        .expect("decodes")
        .expect("complete");
    assert_eq!(consumed, frame.len());
}

#[test]
fn lengths_beyond_the_declared_size_are_rejected() {
    let request = Request::new(Version::V4, "a.b").with_body(Bytes::from_static(b"body"));
    let mut frame = encode_request(&request).expect("encode").to_vec();
    // Inflate the body length so it runs past the declared size.
    let body_len_at = PREFIX_LEN + 1 + 5 + 4 + 4 + 4;
    frame[body_len_at..body_len_at + 4].copy_from_slice(&64_u32.to_le_bytes());

    let error = decode_request(&frame).expect_err("overrun");
    assert!(
        matches!(error, WireError::Overrun { field: "body", .. }),
        "unexpected error: {error:?}"
    );
}

#[test]
fn non_utf8_action_is_rejected() {
    let request = Request::new(Version::V4, "ab");
    let mut frame = encode_request(&request).expect("encode").to_vec();
    let action_at = PREFIX_LEN + 1 + 5 + 4 + 4 + 4 + 4;
    frame[action_at] = 0xff;

    assert_eq!(decode_request(&frame), Err(WireError::InvalidAction));
}

#[test]
fn oversized_v3_span_id_is_an_encode_error() {
    let request = Request {
        span_id: Bytes::from(vec![1; FIXED_SPAN_ID_LEN + 1]),
        ..Request::new(Version::V3, "a")
    };
    let error = encode_request(&request).expect_err("span too long");
    assert_eq!(
        error,
        WireError::FieldTooLong {
            field: "span_id",
            len: 17,
            max: 16,
            version: 3
        }
    );
}

#[test]
fn v2_caller_id_must_fit_sixteen_bits() {
    let request = Request {
        caller_id: 70_000,
        ..Request::new(Version::V2, "a")
    };
    assert!(matches!(
        encode_request(&request),
        Err(WireError::OutOfRange {
            field: "caller_id",
            ..
        })
    ));
}

#[test]
fn v2_request_accepts_the_historical_response_magic() {
    let request = Request::new(Version::V2, "legacy");
    let mut frame = encode_request(&request).expect("encode").to_vec();
    frame[..4].copy_from_slice(b"<<==");

    assert_eq!(decode_whole(&frame).action, "legacy");
}
