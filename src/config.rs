//! Engine configuration.
//!
//! The configuration is resolved once at startup into an immutable snapshot;
//! the engine never observes configuration changes after
//! [`Engine::start`](crate::engine::Engine::start).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

const CLIENT_CONNECTIONS_DEFAULT: usize = 128;
const SERVER_CONNECTIONS_DEFAULT: usize = 1024;
const LISTEN_BACKLOG_DEFAULT: usize = 128;
const MAX_HEADERS_DEFAULT: usize = 64;
const HEADER_BUFFER_SIZE_DEFAULT: usize = 16 * 1024;
const IO_BUFFER_SIZE_DEFAULT: usize = 32 * 1024;
const LOG_BUFFERS_DEFAULT: usize = 1024;
const KEEPALIVE_TIMEOUT_DEFAULT: u64 = 5;
const CONNECTION_TIMEOUT_DEFAULT: u64 = 60;
const MAX_REQUESTS_PER_CONNECTION_DEFAULT: usize = 100;
const TLS_SESSION_TIMEOUT_DEFAULT: u64 = 7200;
const TLS_SESSION_COUNT_DEFAULT: usize = 32 * 1024;

/// Sizing tuple for one worker role: `(role name, thread count)`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ThreadSpec {
    pub role: String,
    pub count: usize,
}

/// Whether a listener accepts plain or TLS transport.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenerMode {
    #[default]
    Plain,
    Tls,
}

/// Protocol listener binding: `(protocol, address, plain|tls)`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ListenerSpec {
    pub protocol: String,
    pub address: String,
    #[serde(default)]
    pub mode: ListenerMode,
}

/// Resolved engine settings.
///
/// Loaded from a YAML file or built from defaults. Every field has a
/// default so a partial file only overrides what it names.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Size of the outbound connection slot arena.
    pub client_connections: usize,
    /// Size of the inbound connection slot arena (server protocols).
    pub server_connections: usize,
    /// Listen backlog for protocol listeners.
    pub listen_backlog: usize,
    /// Maximum header count accepted when parsing a message head.
    pub max_headers: usize,
    /// Maximum byte size of a message head before it is a framing error.
    pub header_buffer_size: usize,
    /// Capacity of each connection's stream buffers.
    pub io_buffer_size: usize,
    /// Bound of the access-log channel, in records.
    pub log_buffers: usize,
    /// Seconds an idle pooled connection survives before the sweep closes it.
    pub keepalive_timeout: u64,
    /// Seconds any single connect or I/O step may take before the
    /// connection is forced through the close path.
    pub connection_timeout: u64,
    /// Default cap on requests served by one pooled connection.
    pub max_requests_per_connection: usize,
    /// Extra PEM roots appended to the built-in trust store.
    pub tls_ca_file: Option<String>,
    pub tls_cert_file: Option<String>,
    pub tls_key_file: Option<String>,
    /// Recorded for operator visibility; suite selection is delegated to
    /// the TLS provider's defaults.
    pub tls_cipher_list: Option<String>,
    pub tls_session_timeout: u64,
    /// Client-side TLS session cache size.
    pub tls_session_count: usize,
    /// Access-log path. `None` disables the log sink.
    pub access_log: Option<String>,
    /// Worker pool sizing, one entry per role.
    pub client_threads: Vec<ThreadSpec>,
    /// Protocol listener bindings.
    pub listeners: Vec<ListenerSpec>,
    /// Extension -> MIME type map consumed by response formatting helpers.
    pub mime_types: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_connections: CLIENT_CONNECTIONS_DEFAULT,
            server_connections: SERVER_CONNECTIONS_DEFAULT,
            listen_backlog: LISTEN_BACKLOG_DEFAULT,
            max_headers: MAX_HEADERS_DEFAULT,
            header_buffer_size: HEADER_BUFFER_SIZE_DEFAULT,
            io_buffer_size: IO_BUFFER_SIZE_DEFAULT,
            log_buffers: LOG_BUFFERS_DEFAULT,
            keepalive_timeout: KEEPALIVE_TIMEOUT_DEFAULT,
            connection_timeout: CONNECTION_TIMEOUT_DEFAULT,
            max_requests_per_connection: MAX_REQUESTS_PER_CONNECTION_DEFAULT,
            tls_ca_file: None,
            tls_cert_file: None,
            tls_key_file: None,
            tls_cipher_list: None,
            tls_session_timeout: TLS_SESSION_TIMEOUT_DEFAULT,
            tls_session_count: TLS_SESSION_COUNT_DEFAULT,
            access_log: None,
            client_threads: vec![
                ThreadSpec { role: "connect".to_string(), count: 1 },
                ThreadSpec { role: "worker".to_string(), count: 2 },
                ThreadSpec { role: "keepalive".to_string(), count: 1 },
            ],
            listeners: Vec::new(),
            mime_types: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from the file named by the `COURIER_CONFIG`
    /// environment variable, falling back to defaults when unset.
    pub fn load() -> Self {
        match std::env::var("COURIER_CONFIG") {
            Ok(path) => match Self::from_file(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!("{e}; using default configuration");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Read and parse a YAML configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_string(),
            source,
        })
    }

    /// Validate listener bindings against the set of registered protocol
    /// names. Any defect here is fatal: the process must not begin serving
    /// with a partially valid configuration.
    pub fn validate(&self, known_protocols: &[&str]) -> Result<()> {
        for listener in &self.listeners {
            if !known_protocols.contains(&listener.protocol.as_str()) {
                return Err(Error::UnknownProtocol(listener.protocol.clone()));
            }
            if listener.address.parse::<SocketAddr>().is_err() {
                return Err(Error::InvalidListenerAddress(listener.address.clone()));
            }
        }
        Ok(())
    }

    pub fn keepalive_duration(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout)
    }

    pub fn connection_duration(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}
