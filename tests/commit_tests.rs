//! Tests for the synchronous response commit path
//!
//! # Test Coverage
//!
//! - Header flattening: newline-separated strings, arrays, skipped values
//! - Validation of status, headers and body before anything is written
//! - Skip conditions: async mode, committed response, skip header
//! - Body iteration, charset encoding and the body close hook

mod common;

use std::io;

use common::exchange_request;
use jsgi_dispatch::dispatcher::{Body, BodyStream, Chunk, ChunkSink, Headers, Request, ResponseParts};
use jsgi_dispatch::server::{commit, Exchange, SKIP_RESPONSE_HEADER};
use jsgi_dispatch::DispatchError;
use serde_json::json;

#[test]
fn test_newline_header_value_becomes_repeated_lines() {
    let (exchange, request) = exchange_request("/");
    let parts = ResponseParts::new(200)
        .header("Set-Cookie", "a=1\nb=2\nc=3")
        .header("Content-Type", "text/plain")
        .body(Body::text("ok"));

    commit(&request, parts).unwrap();

    assert_eq!(exchange.header_values("Set-Cookie"), vec!["a=1", "b=2", "c=3"]);
    let names: Vec<String> = exchange.headers().into_iter().map(|(k, _)| k).collect();
    assert_eq!(names, vec!["Set-Cookie", "Set-Cookie", "Set-Cookie", "Content-Type"]);
}

#[test]
fn test_array_header_and_non_string_values() {
    let (exchange, request) = exchange_request("/");
    let parts = ResponseParts::new(200)
        .header("Vary", json!(["Accept", "Origin"]))
        .header("X-Count", json!(3))
        .header("X-Nothing", json!(null))
        .body(Body::text(""));

    commit(&request, parts).unwrap();

    assert_eq!(exchange.header_values("Vary"), vec!["Accept", "Origin"]);
    assert!(exchange.header_values("X-Count").is_empty());
    assert!(exchange.header_values("X-Nothing").is_empty());
}

#[test]
fn test_missing_fields_fail_without_writes() {
    let incomplete = [
        ResponseParts {
            status: None,
            headers: Some(Headers::new()),
            body: Some(Body::text("x")),
        },
        ResponseParts {
            status: Some(200),
            headers: None,
            body: Some(Body::text("x")),
        },
        ResponseParts::new(200),
    ];

    for parts in incomplete {
        let (exchange, request) = exchange_request("/");
        let err = commit(&request, parts).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidResponse(_)), "got {err:?}");
        assert!(!exchange.touched());
    }
}

#[test]
fn test_invalid_response_message_names_missing_field() {
    let (_exchange, request) = exchange_request("/");
    let err = commit(&request, ResponseParts::new(204)).unwrap_err();
    assert!(err.to_string().contains("missing body"), "{err}");
}

#[test]
fn test_skip_header_suppresses_all_writes() {
    let (exchange, request) = exchange_request("/");
    let parts = ResponseParts::text(200, "text/plain", "ignored").header(SKIP_RESPONSE_HEADER, "");

    commit(&request, parts).unwrap();
    assert!(!exchange.touched());
}

#[test]
fn test_committed_response_is_left_alone() {
    let (exchange, request) = exchange_request("/");
    exchange.mark_committed();

    commit(&request, ResponseParts::text(500, "text/plain", "late")).unwrap();
    assert!(!exchange.touched());
}

#[test]
fn test_async_exchange_skips_validation() {
    let (exchange, request) = exchange_request("/");
    let _context = exchange.start_async().unwrap();

    // even an incomplete descriptor is accepted once async owns the output
    commit(&request, ResponseParts::default()).unwrap();
    assert!(!exchange.touched());
}

#[test]
fn test_body_not_iterable_writes_no_body_bytes() {
    let (exchange, request) = exchange_request("/");
    let parts = ResponseParts::new(200)
        .header("Content-Type", "text/plain")
        .body(Body::Value(json!({"not": "a list"})));

    let err = commit(&request, parts).unwrap_err();

    match err {
        DispatchError::BodyNotIterable(value) => assert!(value.contains("not")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(exchange.channel().write_calls(), 0);
    // status and headers were set before the body was inspected
    assert_eq!(exchange.status(), Some(200));
}

#[test]
fn test_array_body_writes_each_element() {
    let (exchange, request) = exchange_request("/");
    let parts = ResponseParts::new(200)
        .header("Content-Type", "text/plain")
        .body(Body::Value(json!(["a", "b", "c"])));

    commit(&request, parts).unwrap();

    let chunks: Vec<Vec<u8>> = exchange.channel().chunks().iter().map(|c| c.to_vec()).collect();
    assert_eq!(chunks, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(exchange.channel().flushes(), 1);
}

#[test]
fn test_charset_from_content_type() {
    let (exchange, request) = exchange_request("/");
    let parts = ResponseParts::new(200)
        .header("Content-Type", "text/plain; charset=ISO-8859-1")
        .body(Body::chunks(vec![
            Chunk::from("caf\u{e9} \u{263a}"),
            Chunk::from(vec![0xC3u8, 0xA9]),
        ]));

    commit(&request, parts).unwrap();

    let mut expected = b"caf".to_vec();
    expected.extend_from_slice(&[0xE9, b' ', b'?', 0xC3, 0xA9]);
    assert_eq!(exchange.channel().written(), expected);
}

struct WithTrailer {
    lines: Vec<&'static str>,
}

impl BodyStream for WithTrailer {
    fn for_each(&mut self, sink: &mut ChunkSink<'_>) -> io::Result<()> {
        for line in self.lines.drain(..) {
            sink(Chunk::from(line))?;
        }
        Ok(())
    }

    fn close(&mut self, sink: &mut ChunkSink<'_>) -> io::Result<()> {
        sink(Chunk::from("-- end --"))
    }
}

#[test]
fn test_close_hook_runs_after_iteration_with_same_writer() {
    let (exchange, request) = exchange_request("/");
    let parts = ResponseParts::new(200)
        .header("Content-Type", "text/plain")
        .body(Body::stream(WithTrailer {
            lines: vec!["one\n", "two\n"],
        }));

    commit(&request, parts).unwrap();
    assert_eq!(exchange.channel().written(), b"one\ntwo\n-- end --");
}

#[test]
fn test_channel_error_propagates() {
    let (exchange, request) = exchange_request("/");
    exchange.channel().fail_next_write();

    let err = commit(&request, ResponseParts::text(200, "text/plain", "x")).unwrap_err();
    assert!(matches!(err, DispatchError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
}

#[test]
fn test_request_without_transport() {
    let request = Request::builder().path("/").build();
    let err = commit(&request, ResponseParts::text(200, "text/plain", "x")).unwrap_err();
    assert!(matches!(err, DispatchError::InvalidRequest(_)));
}
