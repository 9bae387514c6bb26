use thiserror::Error;

/// The error type for engine operations.
///
/// Variants fall into four tiers with different recovery behavior:
///
/// - **Configuration defects** are fatal at startup.
///   [`Engine::start`](crate::engine::Engine::start) refuses to bring up
///   a partially configured process.
/// - **Transport and framing errors** are connection-level: the engine
///   closes the affected connection, fails its queued requests, and frees
///   the slot. They never propagate as a process fault.
/// - **Request-level errors** are local to one request; the connection
///   remains usable when the wire framing was left intact.
/// - **Resource exhaustion** is reported to the submitter as a retryable
///   failure.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration defects (fatal at startup)
    // ============================================================================
    /// Two bindings for the same state have overlapping thread masks, so
    /// action selection would be ambiguous at dispatch time.
    #[error("ambiguous binding for state '{state}': masks {first} and {second} overlap")]
    AmbiguousBinding {
        state: &'static str,
        first: String,
        second: String,
    },

    /// A state was registered twice.
    #[error("state '{0}' registered more than once")]
    DuplicateState(&'static str),

    /// A state has an action that no configured thread role can execute.
    #[error("state '{state}' is unreachable: no configured role matches mask {required}")]
    UncoveredState {
        state: &'static str,
        required: String,
    },

    /// A thread-pool sizing tuple names a role the engine does not know.
    #[error("unknown thread role '{0}'")]
    UnknownRole(String),

    /// A listener binding names a protocol that is not registered.
    #[error("unknown protocol '{0}' in listener binding")]
    UnknownProtocol(String),

    /// A listener binding carries an address that does not parse.
    #[error("invalid listener address '{0}'")]
    InvalidListenerAddress(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration {path}: {source}")]
    ConfigParse {
        path: String,
        source: serde_yaml::Error,
    },

    /// Failed to load extra CA certificates from `tls_ca_file`.
    #[error("failed to load CA certificates from {path}: {source}")]
    TlsCertificateLoad {
        path: String,
        source: std::io::Error,
    },

    /// `tls_ca_file` contained no usable certificate.
    #[error("invalid certificate in {path}: {reason}")]
    TlsInvalidCertificate { path: String, reason: String },

    // ============================================================================
    // Transport errors (connection-level)
    // ============================================================================
    /// Low-level I/O error from the operating system.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Hostname did not resolve to any usable address.
    #[error("could not resolve host '{0}'")]
    HostNotFound(String),

    /// Connection-establishment or in-flight I/O exceeded `connection_timeout`.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// TLS handshake failed during connection establishment.
    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),

    /// Host name is not a valid TLS server name.
    #[error("invalid server name '{0}'")]
    TlsInvalidServerName(String),

    // ============================================================================
    // Framing errors (connection-level, with diagnostic)
    // ============================================================================
    /// Peer sent bytes that do not parse as the protocol expects
    /// (malformed status line, header overflow, truncated body).
    #[error("protocol framing error: {0}")]
    Framing(String),

    // ============================================================================
    // Request-level errors
    // ============================================================================
    /// A handler reported failure for a single request.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Target URL could not be turned into a connectable endpoint.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    // ============================================================================
    // Resource exhaustion (retryable)
    // ============================================================================
    /// No free connection slot is available for a new outbound connection.
    #[error("connection pool exhausted")]
    PoolExhausted,
}

impl Error {
    /// Whether this error corrupts or loses the connection itself, as
    /// opposed to failing a single request on an otherwise healthy
    /// connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::HostNotFound(_)
                | Error::ConnectionTimeout
                | Error::TlsHandshake(_)
                | Error::TlsInvalidServerName(_)
                | Error::Framing(_)
        )
    }

    /// Whether the submitter may simply retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PoolExhausted)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
