//! Scripted transport for testing code built on the executor.

use crate::errors::TransportError;
use crate::transport::{HttpTransport, RawResponse, RequestDescriptor};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Canned responses
pub struct MockResponse;

impl MockResponse {
    /// `status` with a JSON body
    pub fn json<T: Serialize>(status: u16, data: &T) -> RawResponse {
        RawResponse::new(status, serde_json::to_vec(data).unwrap_or_default())
            .with_header("content-type", "application/json")
    }

    /// Error response with a `{"message": ...}` body
    pub fn error(status: u16, message: &str) -> RawResponse {
        Self::json(status, &serde_json::json!({ "message": message }))
    }

    /// 429 with a `Retry-After` in whole seconds
    pub fn rate_limited(retry_after_secs: u64) -> RawResponse {
        Self::error(429, "Too many requests")
            .with_header("Retry-After", &retry_after_secs.to_string())
    }
}

/// A request seen by the mock, with the instant it was dispatched
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// The request as sent, including decorated headers
    pub request: RequestDescriptor,
    /// When `send` was called
    pub at: Instant,
}

/// Mock HTTP transport returning scripted outcomes in order.
///
/// Once the script is exhausted the fallback outcome is returned, which
/// defaults to a 500.
pub struct MockTransport {
    script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    fallback: Mutex<Result<RawResponse, TransportError>>,
    requests: Mutex<Vec<MockRequest>>,
    latency: Option<Duration>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(RawResponse::new(500, "No mock response configured"))),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Delay every `send` by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a response
    pub fn push_response(&self, response: RawResponse) -> &Self {
        self.script.lock().push_back(Ok(response));
        self
    }

    /// Queue a transport failure
    pub fn push_error(&self, error: TransportError) -> &Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Return `response` whenever the script is empty
    pub fn always(&self, response: RawResponse) -> &Self {
        *self.fallback.lock() = Ok(response);
        self
    }

    /// Fail with `error` whenever the script is empty
    pub fn always_fail(&self, error: TransportError) -> &Self {
        *self.fallback.lock() = Err(error);
        self
    }

    /// Get recorded requests
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().clone()
    }

    /// Number of `send` calls so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Dispatch instants, in call order
    pub fn dispatch_times(&self) -> Vec<Instant> {
        self.requests.lock().iter().map(|r| r.at).collect()
    }

    /// Get the last request
    pub fn last_request(&self) -> Option<RequestDescriptor> {
        self.requests.lock().last().map(|r| r.request.clone())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        self.requests.lock().push(MockRequest {
            request: request.clone(),
            at: Instant::now(),
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let mock = MockTransport::new();
        mock.push_response(MockResponse::rate_limited(2))
            .push_error(TransportError::Connect {
                message: "refused".to_string(),
            })
            .always(RawResponse::new(204, ""));

        let request = RequestDescriptor::get("/ping");
        let first = mock.send(&request).await.unwrap();
        assert_eq!(first.status, 429);
        assert_eq!(first.headers.get("retry-after").unwrap(), "2");
        assert!(mock.send(&request).await.is_err());
        assert_eq!(mock.send(&request).await.unwrap().status, 204);
        assert_eq!(mock.send(&request).await.unwrap().status, 204);

        assert_eq!(mock.call_count(), 4);
        assert_eq!(mock.last_request(), Some(request));
    }

    #[tokio::test]
    async fn test_default_fallback_is_server_error() {
        let mock = MockTransport::default();
        let response = mock.send(&RequestDescriptor::get("/")).await.unwrap();
        assert_eq!(response.status, 500);
    }
}
