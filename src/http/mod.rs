//! HTTP/1.1 client protocol.
//!
//! This module implements the HTTP client on top of the generic protocol
//! engine: it registers the client's states and thread-mask bindings,
//! carries the per-connection protocol data, and provides the actions the
//! engine dispatches.
//!
//! # Connection state machine
//!
//! ```text
//!        ┌──────────┐
//!        │   free   │ ← slot allocated, not yet connected
//!        └────┬─────┘
//!             │ connect (tls?)
//!             ▼
//!   ┌───────────────────┐
//!   │   tls_handshake   │ ← connect mask
//!   └────────┬──────────┘
//!            ▼
//!   ┌───────────────────┐      ┌───────────────────┐
//!   │  client_request   │ ───→ │   client_body     │
//!   └────────┬──────────┘      └────────┬──────────┘
//!            ▼                          │
//!   ┌───────────────────┐      ┌────────▼──────────┐
//!   │  server_response  │ ───→ │   server_body     │
//!   └────────┬──────────┘      └────────┬──────────┘
//!            │  next queued request     │
//!            ├──────────────────────────┘
//!            ▼
//!   ┌───────────────────┐
//!   │     waiting       │ ← keepalive mask; idle pool
//!   └────────┬──────────┘
//!            ├─ reused → client_request
//!            └─ timeout / close → free
//! ```
//!
//! Hand-off between thread masks happens only at the marked state
//! boundaries: the connect mask owns `free` and `tls_handshake`, the worker
//! mask owns the request/response cycle, and the keepalive mask owns
//! `waiting` and the timeout sweep.

pub mod client;
pub mod handler;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;

use std::collections::VecDeque;
use std::time::Instant;

use url::Url;

use crate::config::Config;
use crate::conn::BufferedConn;
use crate::engine::mask::ThreadMask;
use crate::engine::pool::{ConnId, HostKey, PoolEntry};
use crate::engine::state::{Action, Binding, StateId, StateTable, StateTableBuilder};
use crate::error::{Error, Result};
use crate::http::handler::ClientHandler;
use crate::http::request::Method;

/// Protocol name used in listener bindings and diagnostics.
pub const PROTOCOL_NAME: &str = "http_client";

pub const CLIENT_NAME: &str = "courier";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register the HTTP client's states and bindings.
///
/// Runs once per engine; the resulting table is immutable.
pub fn client_states() -> Result<StateTable> {
    let builder = StateTableBuilder::new()
        .register_state(
            StateId::Free,
            vec![Binding { mask: ThreadMask::CONNECT, action: Action::ConnectHost }],
        )?
        .register_state(
            StateId::TlsHandshake,
            vec![Binding { mask: ThreadMask::CONNECT, action: Action::ProcessTlsHandshake }],
        )?
        .register_state(
            StateId::ClientRequest,
            vec![Binding { mask: ThreadMask::WORKER, action: Action::ProcessNextRequest }],
        )?
        .register_state(
            StateId::ClientBody,
            vec![Binding { mask: ThreadMask::WORKER, action: Action::WriteClientBody }],
        )?
        .register_state(
            StateId::ServerResponse,
            vec![Binding { mask: ThreadMask::WORKER, action: Action::ReadServerResponse }],
        )?
        .register_state(
            StateId::ServerBody,
            vec![Binding { mask: ThreadMask::WORKER, action: Action::ReadServerBody }],
        )?
        .register_state(
            StateId::Waiting,
            vec![Binding { mask: ThreadMask::KEEPALIVE, action: Action::KeepaliveWait }],
        )?;
    Ok(builder.build())
}

/// Connectable endpoint derived from a request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl RequestTarget {
    pub fn from_url(url: &Url) -> Result<Self> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(Error::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme '{other}'"),
                });
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_string();
        let port = url.port().unwrap_or(if tls { 443 } else { 80 });
        Ok(Self { host, port, tls })
    }

    pub fn host_key(&self) -> HostKey {
        HostKey { host: self.host.clone(), port: self.port }
    }
}

/// A submitted request: method, target URL, and its handler capability.
pub struct ClientRequest {
    pub method: Method,
    pub url: Url,
    pub handler: Box<dyn ClientHandler>,
}

impl ClientRequest {
    pub fn new(method: Method, url: Url, handler: Box<dyn ClientHandler>) -> Self {
        Self { method, url, handler }
    }
}

/// How the current response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// No body follows the head.
    None,
    /// Exactly this many bytes remain.
    Length(usize),
    /// Body runs until the server closes the connection.
    Eof,
}

/// The request currently at the head of the line on a connection.
pub(crate) struct ActiveRequest {
    pub method: Method,
    pub url: Url,
    pub handler: Box<dyn ClientHandler>,
    /// Set when a handler reported request-level failure; the body is
    /// still drained to keep the framing intact.
    pub failed: Option<String>,
    pub body: BodyFraming,
}

/// One HTTP client connection: transport, protocol position, and the
/// ordered request queue.
pub struct ClientConn {
    id: ConnId,
    state: StateId,
    pub(crate) conn: BufferedConn,
    pub(crate) target: RequestTarget,
    pub(crate) url_requests: VecDeque<ClientRequest>,
    pub(crate) current: Option<ActiveRequest>,
    pub(crate) connection_close: bool,
    pub(crate) requests_processed: usize,
}

impl ClientConn {
    pub fn new(id: ConnId, cfg: &Config, target: RequestTarget) -> Self {
        let mut conn = BufferedConn::new(cfg.io_buffer_size);
        conn.set_nodelay(true);
        Self {
            id,
            state: StateId::Free,
            conn,
            target,
            url_requests: VecDeque::new(),
            current: None,
            connection_close: false,
            requests_processed: 0,
        }
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn set_state(&mut self, state: StateId) {
        tracing::trace!(conn_id = self.id, from = %self.state, to = %state, "state transition");
        self.state = state;
    }

    /// Append a request to the tail of this connection's FIFO queue.
    pub fn enqueue(&mut self, request: ClientRequest) {
        self.url_requests.push_back(request);
    }
}

impl PoolEntry for ClientConn {
    fn id(&self) -> ConnId {
        self.id
    }

    fn last_activity(&self) -> Instant {
        self.conn.last_activity()
    }

    fn requests_processed(&self) -> usize {
        self.requests_processed
    }

    fn close(&mut self) {
        self.conn.close();
        self.state = StateId::Free;
    }
}
