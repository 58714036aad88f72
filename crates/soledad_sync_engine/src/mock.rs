//! In-memory HTTP client for tests.

use crate::error::SyncResult;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;

type Handler = dyn Fn(&HttpRequest) -> SyncResult<HttpResponse> + Send + Sync;
type Delay = dyn Fn(&HttpRequest) -> Duration + Send + Sync;

/// A scripted [`HttpClient`].
///
/// Every request is recorded and answered by the handler. An optional
/// delay function holds individual responses back, which lets tests make
/// concurrent requests complete out of order.
pub struct MockHttpClient {
    handler: Box<Handler>,
    delay: Option<Box<Delay>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    /// Creates a client answering with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> SyncResult<HttpResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Delays each response by `delay(request)`.
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&HttpRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    /// Returns the requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl fmt::Debug for MockHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHttpClient")
            .field("requests", &self.request_count())
            .finish()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = &self.delay {
            let wait = delay(&request);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
        (self.handler)(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[tokio::test]
    async fn records_requests() {
        let client = MockHttpClient::new(|req| Ok(HttpResponse::ok(req.url.clone())));
        let response = client
            .send(HttpRequest {
                method: Method::Get,
                url: "https://s/a".into(),
                headers: vec![],
                body: None,
            })
            .await
            .unwrap();
        assert_eq!(response.body, b"https://s/a");
        assert_eq!(client.request_count(), 1);
    }
}
