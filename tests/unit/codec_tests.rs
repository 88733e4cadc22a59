//! Unit tests for the NDJSON line codec.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use agent_conduit::transport::codec::NdjsonCodec;
use agent_conduit::SdkError;

const MAX: usize = 1_048_576;

/// A complete newline-terminated line decodes to its content without the
/// trailing newline.
#[test]
fn single_line_decodes() {
    let mut codec = NdjsonCodec::new(MAX);
    let mut buf = BytesMut::from("{\"type\":\"assistant\"}\n");

    let line = codec
        .decode(&mut buf)
        .expect("decode must succeed for a valid line");
    assert_eq!(line.as_deref(), Some("{\"type\":\"assistant\"}"));
}

/// Two lines delivered in one buffer decode as two items.
#[test]
fn batched_lines_decode_separately() {
    let mut codec = NdjsonCodec::new(MAX);
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\":2}\n");

    assert_eq!(
        codec.decode(&mut buf).expect("first decode").as_deref(),
        Some("{\"a\":1}")
    );
    assert_eq!(
        codec.decode(&mut buf).expect("second decode").as_deref(),
        Some("{\"b\":2}")
    );
    assert!(
        codec.decode(&mut buf).expect("empty decode").is_none(),
        "no further lines must be present"
    );
}

/// A line without its terminating newline is buffered, not emitted.
#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = NdjsonCodec::new(MAX);
    let mut buf = BytesMut::from("{\"type\":\"res");

    assert!(
        codec.decode(&mut buf).expect("partial decode").is_none(),
        "partial line must not be emitted before the newline"
    );

    buf.extend_from_slice(b"ult\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("completed decode").as_deref(),
        Some("{\"type\":\"result\"}")
    );
}

/// A line over the cap produces a decode-kind error naming the limit.
#[test]
fn oversize_line_is_a_decode_error() {
    let max = 64;
    let mut codec = NdjsonCodec::new(max);
    let big = "a".repeat(max + 10) + "\n";
    let mut buf = BytesMut::from(big.as_str());

    match codec.decode(&mut buf) {
        Err(SdkError::Decode { message, .. }) => assert!(
            message.contains("maximum buffer size"),
            "error must name the buffer cap, got: {message}"
        ),
        other => panic!("expected Err(SdkError::Decode), got: {other:?}"),
    }
}
