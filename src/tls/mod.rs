//! Client TLS for `wss` endpoints (feature `tls-rustls`).

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::transport::TransportError;

/// Wraps TCP streams in a client TLS session verified against the webpki roots.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Connector trusting the Mozilla root store shipped with `webpki-roots`,
    /// using the ring crypto provider.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if the provider rejects the default
    /// protocol versions.
    pub fn with_webpki_roots() -> Result<Self, TransportError> {
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(Self::from_config(Arc::new(config)))
    }

    /// Connector using a caller-supplied rustls configuration.
    #[must_use]
    pub fn from_config(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }

    /// Run the TLS handshake for `domain` over `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] for an invalid server name or a failed handshake.
    pub async fn connect(
        &self,
        domain: &str,
        stream: TcpStream,
    ) -> Result<TlsStream<TcpStream>, TransportError> {
        let name = ServerName::try_from(domain.to_string())
            .map_err(|e| TransportError::Tls(format!("invalid server name {domain}: {e}")))?;
        self.inner
            .connect(name, stream)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_server_name() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let err = TlsConnector::with_webpki_roots()
            .unwrap()
            .connect("not a hostname!", stream)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Tls(_)));
    }
}
