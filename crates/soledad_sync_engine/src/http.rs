//! Token-authenticated HTTP transport.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so the engine
//! can run against [`PinnedHttpClient`](crate::PinnedHttpClient) in
//! production and against an in-memory client in tests.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Body the server sends with a 401 caused by a bad token.
pub const UNAUTHORIZED_BODY: &str = "401 Unauthorized";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `PUT`
    Put,
    /// `POST`
    Post,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

/// A request as handed to an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Returns the first header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the body as text, if it is UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .and_then(|body| std::str::from_utf8(body).ok())
    }
}

/// A raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Creates a `200 OK` response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations only move bytes: they return every response, whatever
/// its status, and fail only when no response was received.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends `request` and returns the response.
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse>;
}

#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        (**self).send(request).await
    }
}

/// User credentials for the sync server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    uuid: String,
    token: String,
}

impl Credentials {
    /// Creates credentials from a user uuid and an auth token.
    pub fn new(uuid: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            token: token.into(),
        }
    }

    /// Returns the user uuid.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Value of the `Authorization` header: `Token base64(uuid:token)`.
    pub fn authorization(&self) -> String {
        let pair = format!("{}:{}", self.uuid, self.token);
        format!("Token {}", STANDARD.encode(pair))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("uuid", &self.uuid)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Authenticated transport on top of an [`HttpClient`].
///
/// Credentials can be swapped at any time; each request reads them once,
/// right before it is issued, so a rotation affects only later requests.
pub struct HttpTransport<C: HttpClient> {
    client: C,
    credentials: RwLock<Option<Credentials>>,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport without credentials.
    pub fn new(client: C) -> Self {
        Self {
            client,
            credentials: RwLock::new(None),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport with `credentials`.
    pub fn with_credentials(client: C, credentials: Credentials) -> Self {
        let transport = Self::new(client);
        transport.set_creds(credentials);
        transport
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Replaces the credentials.
    pub fn set_creds(&self, credentials: Credentials) {
        *self.credentials.write() = Some(credentials);
    }

    /// Replaces the token, keeping the uuid.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if no credentials were set before.
    pub fn set_token(&self, token: impl Into<String>) -> SyncResult<()> {
        let mut guard = self.credentials.write();
        match guard.as_mut() {
            Some(credentials) => {
                credentials.token = token.into();
                Ok(())
            }
            None => Err(SyncError::Config(
                "cannot set a token before credentials".into(),
            )),
        }
    }

    /// Returns the current credentials.
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true until [`close`](Self::close) is called.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Refuses further requests.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Issues an authenticated request and returns the body of a 2xx
    /// response.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidAuthToken`] for a 401 whose body is
    ///   `"401 Unauthorized"`
    /// - [`SyncError::Http`] for any other non-2xx status
    /// - [`SyncError::Transport`] if no response was received
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> SyncResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(SyncError::transport_fatal("transport is closed"));
        }

        let mut all_headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let Some(credentials) = self.credentials.read().as_ref() {
            all_headers.push(("authorization".into(), credentials.authorization()));
        }

        let request = HttpRequest {
            method,
            url: url.to_string(),
            headers: all_headers,
            body,
        };
        tracing::trace!(method = method.as_str(), url, "sending request");

        let response = match self.client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                self.set_error(&e);
                return Err(e);
            }
        };

        if response.is_success() {
            *self.last_error.write() = None;
            return Ok(response.body);
        }

        let body = String::from_utf8_lossy(&response.body).into_owned();
        let err = if response.status == 401 && body.trim() == UNAUTHORIZED_BODY {
            SyncError::InvalidAuthToken
        } else {
            SyncError::Http {
                status: response.status,
                body,
            }
        };
        self.set_error(&err);
        Err(err)
    }

    fn set_error(&self, err: &SyncError) {
        tracing::debug!(error = %err, "request failed");
        *self.last_error.write() = Some(err.to_string());
    }
}

impl<C: HttpClient> fmt::Debug for HttpTransport<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("credentials", &*self.credentials.read())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHttpClient;

    fn transport(client: MockHttpClient) -> HttpTransport<MockHttpClient> {
        HttpTransport::with_credentials(client, Credentials::new("user-uuid", "token-1"))
    }

    #[test]
    fn authorization_header_format() {
        let creds = Credentials::new("uuid", "token");
        // base64("uuid:token")
        assert_eq!(creds.authorization(), "Token dXVpZDp0b2tlbg==");
        let printed = format!("{:?}", Credentials::new("uuid", "s3cret"));
        assert!(!printed.contains("s3cret"));
    }

    #[tokio::test]
    async fn request_adds_authorization() {
        let client = MockHttpClient::new(|_| Ok(HttpResponse::ok("hello")));
        let transport = transport(client);

        let body = transport
            .request(Method::Get, "https://s/x", &[("accept", "*/*")], None)
            .await
            .unwrap();
        assert_eq!(body, b"hello");

        let requests = transport.client().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("accept"), Some("*/*"));
        assert_eq!(
            requests[0].header("Authorization"),
            Some(Credentials::new("user-uuid", "token-1").authorization().as_str())
        );
    }

    #[tokio::test]
    async fn unauthorized_body_maps_to_invalid_token() {
        let client = MockHttpClient::new(|_| Ok(HttpResponse::new(401, UNAUTHORIZED_BODY)));
        let transport = transport(client);
        let err = transport
            .request(Method::Get, "https://s/x", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidAuthToken));
        assert!(transport.last_error().is_some());
    }

    #[tokio::test]
    async fn other_401_is_generic() {
        let client = MockHttpClient::new(|_| Ok(HttpResponse::new(401, "expired session")));
        let transport = transport(client);
        let err = transport
            .request(Method::Get, "https://s/x", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn server_error_is_http() {
        let client = MockHttpClient::new(|_| Ok(HttpResponse::new(500, "boom")));
        let transport = transport(client);
        let err = transport
            .request(Method::Post, "https://s/x", &[], Some(b"[]".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 500, ref body } if body == "boom"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn token_rotation_affects_later_requests() {
        let client = MockHttpClient::new(|_| Ok(HttpResponse::ok("")));
        let transport = transport(client);

        transport.request(Method::Get, "https://s/1", &[], None).await.unwrap();
        transport.set_token("token-2").unwrap();
        transport.request(Method::Get, "https://s/2", &[], None).await.unwrap();

        let requests = transport.client().requests();
        assert_eq!(
            requests[0].header("authorization"),
            Some(Credentials::new("user-uuid", "token-1").authorization().as_str())
        );
        assert_eq!(
            requests[1].header("authorization"),
            Some(Credentials::new("user-uuid", "token-2").authorization().as_str())
        );
    }

    #[test]
    fn set_token_without_credentials() {
        let transport = HttpTransport::new(MockHttpClient::new(|_| Ok(HttpResponse::ok(""))));
        assert!(matches!(transport.set_token("t"), Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn closed_transport_refuses_requests() {
        let transport = transport(MockHttpClient::new(|_| Ok(HttpResponse::ok(""))));
        transport.close();
        assert!(!transport.is_connected());
        let err = transport
            .request(Method::Get, "https://s/x", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport { retryable: false, .. }));
        assert!(transport.client().requests().is_empty());
    }
}
