use std::collections::HashMap;

use crate::http::response::Response;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidResponse,
    InvalidStatusLine,
    InvalidStatusCode,
    InvalidHeader,
    TooManyHeaders,
    Incomplete,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParseError::InvalidResponse => "invalid response",
            ParseError::InvalidStatusLine => "invalid status line",
            ParseError::InvalidStatusCode => "invalid status code",
            ParseError::InvalidHeader => "invalid header",
            ParseError::TooManyHeaders => "too many headers",
            ParseError::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// Parse an HTTP response head from a byte buffer.
///
/// Returns the parsed head and the number of bytes consumed (through the
/// blank line). `Incomplete` means more bytes are needed; any other error
/// is a framing error and aborts the connection.
pub fn parse_http_response(
    buf: &[u8],
    max_headers: usize,
) -> Result<(Response, usize), ParseError> {
    // Look for head/body separator
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];

    let headers_str =
        std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidResponse)?;

    let mut lines = headers_str.split("\r\n");

    // Status line: version SP status [SP reason]
    let status_line = lines.next().ok_or(ParseError::InvalidResponse)?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().ok_or(ParseError::InvalidStatusLine)?;
    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidStatusLine);
    }
    let status_str = parts.next().ok_or(ParseError::InvalidStatusLine)?;
    if status_str.len() != 3 {
        return Err(ParseError::InvalidStatusCode);
    }
    let status: u16 = status_str.parse().map_err(|_| ParseError::InvalidStatusCode)?;
    let reason = parts.next().unwrap_or("").to_string();

    // Headers
    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        if headers.len() >= max_headers {
            return Err(ParseError::TooManyHeaders);
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        headers.insert(key.trim().to_string(), value.trim().to_string());
    }

    let response = Response {
        version: version.to_string(),
        status,
        reason,
        headers,
    };

    Ok((response, headers_end + 4))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_ok() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

        let (resp, consumed) = parse_http_response(raw, 64).unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.content_length(), Some(5));
        assert_eq!(consumed, raw.len() - 5);
    }

    #[test]
    fn incomplete_head_asks_for_more() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Len";
        assert_eq!(parse_http_response(raw, 64).unwrap_err(), ParseError::Incomplete);
    }
}
