//! Tests for HTTP response parsing and framing decisions

use courier::http::parser::{ParseError, parse_http_response};

#[test]
fn test_parse_simple_response() {
    let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nServer: test\r\n\r\nhello";
    let (response, consumed) = parse_http_response(raw, 64).unwrap();

    assert_eq!(response.version, "HTTP/1.1");
    assert_eq!(response.status, 200);
    assert_eq!(response.reason, "OK");
    assert_eq!(response.content_length(), Some(5));
    assert_eq!(response.header("Server"), Some("test"));
    // The body is not part of the head.
    assert_eq!(&raw[consumed..], b"hello");
}

#[test]
fn test_parse_incomplete_head() {
    let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n";
    assert!(matches!(parse_http_response(raw, 64), Err(ParseError::Incomplete)));
    assert!(matches!(parse_http_response(b"", 64), Err(ParseError::Incomplete)));
}

#[test]
fn test_parse_rejects_non_http_preamble() {
    let raw = b"SSH-2.0-OpenSSH_9.6\r\n\r\n";
    assert!(parse_http_response(raw, 64).is_err());
}

#[test]
fn test_parse_rejects_bad_status_code() {
    let raw = b"HTTP/1.1 2x0 OK\r\n\r\n";
    assert!(parse_http_response(raw, 64).is_err());
}

#[test]
fn test_parse_enforces_header_cap() {
    let mut raw = b"HTTP/1.1 200 OK\r\n".to_vec();
    for i in 0..5 {
        raw.extend_from_slice(format!("X-H{i}: v\r\n").as_bytes());
    }
    raw.extend_from_slice(b"\r\n");

    assert!(parse_http_response(&raw, 8).is_ok());
    assert!(matches!(
        parse_http_response(&raw, 4),
        Err(ParseError::TooManyHeaders)
    ));
}

#[test]
fn test_keep_alive_defaults_by_version() {
    let (http11, _) = parse_http_response(b"HTTP/1.1 200 OK\r\n\r\n", 64).unwrap();
    assert!(http11.keep_alive());

    let (http11_close, _) =
        parse_http_response(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n", 64).unwrap();
    assert!(!http11_close.keep_alive());

    let (http10, _) = parse_http_response(b"HTTP/1.0 200 OK\r\n\r\n", 64).unwrap();
    assert!(!http10.keep_alive());

    let (http10_ka, _) =
        parse_http_response(b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\n\r\n", 64).unwrap();
    assert!(http10_ka.keep_alive());
}

#[test]
fn test_bodyless_statuses() {
    for status in [100u16, 204, 304] {
        let raw = format!("HTTP/1.1 {status} X\r\n\r\n");
        let (response, _) = parse_http_response(raw.as_bytes(), 64).unwrap();
        assert!(response.is_bodyless(), "status {status} must be bodyless");
    }
    let (ok, _) = parse_http_response(b"HTTP/1.1 200 OK\r\n\r\n", 64).unwrap();
    assert!(!ok.is_bodyless());
}

#[test]
fn test_success_range() {
    let (ok, _) = parse_http_response(b"HTTP/1.1 204 No Content\r\n\r\n", 64).unwrap();
    assert!(ok.is_success());
    let (not_found, _) = parse_http_response(b"HTTP/1.1 404 Not Found\r\n\r\n", 64).unwrap();
    assert!(!not_found.is_success());
}
