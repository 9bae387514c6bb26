//! Request/response handler capability.
//!
//! A handler is protocol-specific code bound to exactly one request and,
//! once the request is dispatched, to exactly one connection. The engine
//! owns all I/O; handlers only produce and consume bytes at the defined
//! state transitions, so the capability set is synchronous.

use tokio::sync::oneshot;

use crate::http::request::Request;
use crate::http::response::Response;

/// Progress report from a handler body callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerIo {
    /// Bytes produced into the scratch buffer.
    Count(usize),
    /// Body complete.
    Done,
    /// Request-level failure; the engine fails this request only.
    Failed,
}

/// Final disposition of one request, delivered to `end_request`.
///
/// Every submitted request ends in exactly one `end_request` call; a
/// request is failed, never hung, when its connection dies under it.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Complete,
    Failed(String),
}

/// The per-request capability set invoked by the engine.
pub trait ClientHandler: Send {
    /// Called once when the request reaches the head of its connection's
    /// queue, before `populate_request`.
    fn init(&mut self) {}

    /// Fill in the outbound request head. Headers added here (including
    /// `Content-Length` when a body follows) are serialized verbatim.
    /// Returning `false` fails the request before anything is written.
    fn populate_request(&mut self, request: &mut Request) -> bool;

    /// Produce the next chunk of request body into `buf`.
    fn write_request_body(&mut self, _buf: &mut [u8]) -> HandlerIo {
        HandlerIo::Done
    }

    /// Inspect the response head. Returning `false` fails the request but
    /// the engine still drains the body to keep the connection reusable.
    fn handle_response(&mut self, response: &Response) -> bool;

    /// Consume the next chunk of response body.
    fn read_response_body(&mut self, chunk: &[u8]) -> HandlerIo;

    /// Request finished. The return value reports whether the handler
    /// considers the connection safe to keep alive.
    fn end_request(&mut self, outcome: RequestOutcome) -> bool;
}

/// Completed fetch: response head plus collected body.
#[derive(Debug)]
pub struct FetchResult {
    pub response: Response,
    pub body: Vec<u8>,
}

/// Buffering handler behind [`Engine::fetch`](crate::engine::Engine::fetch).
///
/// Collects the whole body in memory and resolves a oneshot when the
/// request ends.
pub struct FetchHandler {
    body: Option<Vec<u8>>,
    body_written: usize,
    extra_headers: Vec<(String, String)>,
    response: Option<Response>,
    collected: Vec<u8>,
    done: Option<oneshot::Sender<Result<FetchResult, String>>>,
}

impl FetchHandler {
    /// Create a handler and the receiver its outcome resolves.
    pub fn new(
        body: Option<Vec<u8>>,
        extra_headers: Vec<(String, String)>,
    ) -> (Self, oneshot::Receiver<Result<FetchResult, String>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                body,
                body_written: 0,
                extra_headers,
                response: None,
                collected: Vec::new(),
                done: Some(tx),
            },
            rx,
        )
    }
}

impl ClientHandler for FetchHandler {
    fn populate_request(&mut self, request: &mut Request) -> bool {
        for (k, v) in &self.extra_headers {
            request.set_header(k.clone(), v.clone());
        }
        if let Some(body) = &self.body {
            request.set_header("Content-Length", body.len().to_string());
        }
        true
    }

    fn write_request_body(&mut self, buf: &mut [u8]) -> HandlerIo {
        let Some(body) = &self.body else {
            return HandlerIo::Done;
        };
        let remaining = &body[self.body_written..];
        if remaining.is_empty() {
            return HandlerIo::Done;
        }
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.body_written += n;
        HandlerIo::Count(n)
    }

    fn handle_response(&mut self, response: &Response) -> bool {
        self.response = Some(response.clone());
        true
    }

    fn read_response_body(&mut self, chunk: &[u8]) -> HandlerIo {
        self.collected.extend_from_slice(chunk);
        HandlerIo::Count(chunk.len())
    }

    fn end_request(&mut self, outcome: RequestOutcome) -> bool {
        if let Some(done) = self.done.take() {
            let result = match (outcome, self.response.take()) {
                (RequestOutcome::Complete, Some(response)) => Ok(FetchResult {
                    response,
                    body: std::mem::take(&mut self.collected),
                }),
                (RequestOutcome::Complete, None) => {
                    Err("request completed without a response".to_string())
                }
                (RequestOutcome::Failed(reason), _) => Err(reason),
            };
            let _ = done.send(result);
        }
        true
    }
}
