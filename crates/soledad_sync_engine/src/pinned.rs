//! HTTPS client that trusts exactly one certificate.

use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use reqwest::{Certificate, Client};
use std::path::Path;
use std::time::Duration;

/// [`HttpClient`] over `reqwest` with rustls, pinned to one certificate.
///
/// Built-in root certificates are disabled: only the supplied PEM
/// certificate is trusted, and plain `http://` URLs are refused.
#[derive(Debug, Clone)]
pub struct PinnedHttpClient {
    client: Client,
}

impl PinnedHttpClient {
    /// Creates a client trusting the PEM certificate `cert_pem`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the certificate cannot be parsed or
    /// the TLS backend cannot be initialized.
    pub fn new(cert_pem: &[u8], timeout: Duration) -> SyncResult<Self> {
        let certificate = Certificate::from_pem(cert_pem)
            .map_err(|e| SyncError::Config(format!("invalid certificate: {e}")))?;
        let client = Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(certificate)
            .https_only(true)
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Creates a client trusting the PEM certificate stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>, timeout: Duration) -> SyncResult<Self> {
        let path = path.as_ref();
        let pem = std::fs::read(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::new(&pem, timeout)
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        SyncError::transport_retryable(err.to_string())
    } else {
        SyncError::transport_fatal(err.to_string())
    }
}

#[async_trait]
impl HttpClient for PinnedHttpClient {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_certificate() {
        let err = PinnedHttpClient::new(b"not a certificate", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn missing_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PinnedHttpClient::from_file(dir.path().join("cacert.pem"), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
