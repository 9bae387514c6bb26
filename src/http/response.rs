use std::collections::HashMap;

/// A parsed HTTP response head received from a server.
///
/// Body bytes are streamed to the response handler by the engine and are
/// not stored here.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP version from the status line (typically "HTTP/1.1")
    pub version: String,
    /// Numeric status code
    pub status: u16,
    /// Reason phrase, possibly empty
    pub reason: String,
    /// Response headers as key-value pairs
    pub headers: HashMap<String, String>,
}

impl Response {
    /// Retrieves a header value by name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|v| v.as_str())
    }

    /// Declared body length, if the server sent `Content-Length`.
    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length").and_then(|v| v.parse().ok())
    }

    /// True for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the connection may be reused after this response.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close`;
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.header("Connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version != "HTTP/1.0",
        }
    }

    /// Whether this response carries no body regardless of headers
    /// (1xx, 204, 304).
    pub fn is_bodyless(&self) -> bool {
        self.status < 200 || self.status == 204 || self.status == 304
    }
}
