//! Unit tests for the stream decoder: NDJSON framing with newline as a
//! soft boundary and parse-completeness as the real one.

use serde_json::{json, Value};

use agent_conduit::transport::reader::StreamDecoder;
use agent_conduit::SdkError;

const MAX: usize = 1_048_576;

async fn decode_all(input: &[u8], max: usize) -> Vec<Value> {
    let mut decoder = StreamDecoder::new(input, max);
    let mut out = Vec::new();
    while let Some(value) = decoder.next_object().await.expect("decode must succeed") {
        out.push(value);
    }
    out
}

/// One object per line is the base case.
#[tokio::test]
async fn decodes_one_object_per_line() {
    let objects = decode_all(b"{\"a\":1}\n{\"b\":2}\n", MAX).await;
    assert_eq!(objects, vec![json!({"a": 1}), json!({"b": 2})]);
}

/// An object split across newlines is emitted once complete, including a
/// split inside a string literal.
#[tokio::test]
async fn accumulates_object_split_across_lines() {
    let input = b"{\"text\":\"hel\nlo\",\n\"n\": [1,\n2]}\n{\"next\":true}\n";
    let objects = decode_all(input, MAX).await;
    assert_eq!(
        objects,
        vec![json!({"text": "hello", "n": [1, 2]}), json!({"next": true})]
    );
}

/// Empty and whitespace-only lines are skipped.
#[tokio::test]
async fn skips_empty_lines() {
    let objects = decode_all(b"\n   \n{\"a\":1}\n\n", MAX).await;
    assert_eq!(objects, vec![json!({"a": 1})]);
}

/// Informational prelude from wrapper scripts is skipped: whole lines
/// without a brace, and a prefix before the first brace on the same line.
#[tokio::test]
async fn strips_non_json_prelude() {
    let input = b"npm warn deprecated something\nstarting agent... {\"a\":1}\n{\"b\":2}\n";
    let objects = decode_all(input, MAX).await;
    assert_eq!(objects, vec![json!({"a": 1}), json!({"b": 2})]);
}

/// Prelude is only stripped while the buffer is empty; mid-object lines
/// pass through untouched.
#[tokio::test]
async fn keeps_mid_object_lines_intact() {
    let input = b"{\"log\":\"prefix\njunk {not json\"}\n";
    let objects = decode_all(input, MAX).await;
    assert_eq!(objects, vec![json!({"log": "prefixjunk {not json"})]);
}

/// EOF with an incomplete object in the buffer is a clean end of stream.
#[tokio::test]
async fn eof_with_partial_buffer_is_clean() {
    let objects = decode_all(b"{\"a\":1}\n{\"incomplete\":", MAX).await;
    assert_eq!(objects, vec![json!({"a": 1})]);
}

/// An accumulated object exactly at the ceiling parses; one byte over is a
/// decode error carrying the accumulated prefix.
#[tokio::test]
async fn buffer_ceiling_is_exact() {
    // An object split across two lines, with the ceiling set to its
    // exact serialized length.
    let object = r#"{"key":"0123456789012345678901234567"}"#;
    let max = object.len();
    let (head, tail) = object.split_at(20);
    let input = format!("{head}\n{tail}\n");

    let objects = decode_all(input.as_bytes(), max).await;
    assert_eq!(objects.len(), 1, "object exactly at the ceiling must parse");

    // Same split, ceiling one byte lower: decode error with the prefix.
    let mut decoder = StreamDecoder::new(input.as_bytes(), max - 1);
    match decoder.next_object().await {
        Err(SdkError::Decode { message, line }) => {
            assert!(
                message.contains("exceeded maximum buffer size"),
                "error must name the cap, got: {message}"
            );
            assert_eq!(line, object, "error must carry the accumulated prefix");
        }
        other => panic!("expected Err(SdkError::Decode), got: {other:?}"),
    }
}

/// Incomplete JSON that overflows the ceiling across lines errors rather
/// than accumulating forever.
#[tokio::test]
async fn runaway_accumulation_errors() {
    let input = b"{\"a\":\"xxxxxxxxxxxxxxxx\n{\"yyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyy\n";
    let mut decoder = StreamDecoder::new(&input[..], 32);
    assert!(matches!(
        decoder.next_object().await,
        Err(SdkError::Decode { .. })
    ));
}
