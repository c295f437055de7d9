//! HTTP transport trait and the reqwest-backed implementation.

use super::{RawResponse, RequestDescriptor};
use crate::errors::{ConfigurationError, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Performs the actual HTTP call for one attempt.
///
/// Owned by the vendor client and injected into the executor. Returning
/// `Err` means no usable response was read; any response, whatever its
/// status, is returned as `Ok`. An error status whose body cannot be read
/// comes back with an empty body so it is still classified by status.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send one request
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError>;
}

/// Reqwest-based HTTP transport bound to a base URL
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestTransport {
    /// Create a transport with its own connection pool
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                ConfigurationError::invalid(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, base_url })
    }

    /// Create a transport around an existing client
    pub fn with_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// The base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a request's path and query against the base URL.
    ///
    /// The path is appended to the base path rather than replacing it, so
    /// `https://api.example.com/v2` + `/contacts` yields `/v2/contacts`.
    pub fn build_url(&self, request: &RequestDescriptor) -> Result<Url, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = request.path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{}/{}", base, path))?;

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        let url = self.build_url(request)?;
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            // a truncated success payload must not decode as a default value
            Err(e) if (200..300).contains(&status) => return Err(e.into()),
            Err(e) => {
                warn!(status, error = %e, "Failed to read error body, classifying by status");
                Bytes::new()
            }
        };

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
