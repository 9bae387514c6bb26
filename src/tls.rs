//! TLS client context construction.
//!
//! Built once at engine startup and shared read-only by every connect
//! worker; no synchronization is needed after this point.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};

use crate::config::Config;
use crate::error::{Error, Result};

/// Build the shared rustls client context from the configuration snapshot.
///
/// The trust store starts from the bundled webpki roots; `tls_ca_file`
/// appends PEM roots for private deployments. The session cache is sized
/// from `tls_session_count`.
pub fn build_client_context(cfg: &Config) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &cfg.tls_ca_file {
        let file = File::open(path).map_err(|source| Error::TlsCertificateLoad {
            path: path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let mut added = 0usize;
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| Error::TlsInvalidCertificate {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            roots.add(cert).map_err(|e| Error::TlsInvalidCertificate {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            added += 1;
        }
        if added == 0 {
            return Err(Error::TlsInvalidCertificate {
                path: path.clone(),
                reason: "no certificates found in file".to_string(),
            });
        }
        tracing::debug!(path = %path, count = added, "Loaded extra CA certificates");
    }

    if let Some(list) = &cfg.tls_cipher_list {
        // Suite selection stays with the provider defaults; record the
        // configured preference for operators migrating old configs.
        tracing::info!(cipher_list = %list, "tls_cipher_list noted; provider defaults in effect");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.resumption = rustls::client::Resumption::in_memory_sessions(cfg.tls_session_count);

    Ok(Arc::new(config))
}
