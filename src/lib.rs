//! Courier is a pluggable wire-protocol engine with an HTTP/1.1 client as
//! its built-in protocol.
//!
//! Protocols are expressed as state machines: each connection carries a
//! current state, every state is bound to `(thread mask, action)` pairs,
//! and role-tagged worker pools execute the actions. Connections move
//! between roles only at state boundaries, are buffered and non-blocking,
//! and park in a host-keyed idle pool for keepalive reuse.
//!
//! # Example
//!
//! ```no_run
//! use courier::config::Config;
//! use courier::engine::Engine;
//! use courier::http::request::Method;
//!
//! # async fn run() -> courier::error::Result<()> {
//! let engine = Engine::start(Config::default()).await?;
//! let result = engine.fetch(Method::GET, "http://example.com/").await?;
//! println!("{}", result.response.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conn;
pub mod engine;
pub mod error;
pub mod http;
pub mod logsink;
pub mod tls;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use http::ClientRequest;
pub use http::handler::{ClientHandler, FetchResult, HandlerIo, RequestOutcome};
pub use http::request::Method;
