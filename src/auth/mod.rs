//! Credential decoration for outgoing requests.
//!
//! An [`AuthProvider`] is applied to a per-attempt copy of the request
//! headers before the rate governor is consulted, so a credential failure
//! never consumes quota.

use crate::errors::{ClassifiedError, ErrorDetail};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default time before expiry at which a cached token is re-acquired
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Adds credentials to each attempt's headers.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Decorate `headers`; an error is terminal for the call
    async fn apply(&self, headers: &mut HeaderMap) -> Result<(), ClassifiedError>;
}

/// Failure to obtain a token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Token acquisition failed: {message}")]
pub struct TokenError {
    /// What went wrong
    pub message: String,
}

impl TokenError {
    /// Create a token error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

fn auth_failure(message: impl Into<String>) -> ClassifiedError {
    ClassifiedError::Authentication {
        status: None,
        detail: ErrorDetail::Text(message.into()),
    }
}

fn sensitive_value(value: &str) -> Result<HeaderValue, ClassifiedError> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| auth_failure("Credential contains characters not allowed in a header"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Static API key sent in a named header.
pub struct ApiKeyAuth {
    header: HeaderName,
    key: SecretString,
}

impl ApiKeyAuth {
    /// Send `key` in `header`
    pub fn new(header: HeaderName, key: impl Into<String>) -> Self {
        Self {
            header,
            key: SecretString::new(key.into()),
        }
    }

    /// Name of the header carrying the key
    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyAuth")
            .field("header", &self.header)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for ApiKeyAuth {
    async fn apply(&self, headers: &mut HeaderMap) -> Result<(), ClassifiedError> {
        headers.insert(
            self.header.clone(),
            sensitive_value(self.key.expose_secret())?,
        );
        Ok(())
    }
}

/// Static bearer token
pub struct BearerAuth {
    token: SecretString,
}

impl BearerAuth {
    /// Send `Authorization: Bearer <token>`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into()),
        }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for BearerAuth {
    async fn apply(&self, headers: &mut HeaderMap) -> Result<(), ClassifiedError> {
        let value = format!("Bearer {}", self.token.expose_secret());
        headers.insert(AUTHORIZATION, sensitive_value(&value)?);
        Ok(())
    }
}

/// A token with an optional expiry
#[derive(Clone)]
pub struct AccessToken {
    value: SecretString,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// Create a token valid for `expires_in`, or indefinitely if `None`
    pub fn new(value: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            value: SecretString::new(value.into()),
            expires_at: expires_in.map(|ttl| Instant::now() + ttl),
        }
    }

    /// Instant the token stops being valid
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Expose the token value
    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }

    /// Whether the token expires within `buffer` of now
    pub fn expires_within(&self, buffer: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() + buffer >= expires_at,
            None => false,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where fresh tokens come from (client-credentials grant, refresh grant...)
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtain a new token
    async fn fetch_token(&self) -> Result<AccessToken, TokenError>;
}

/// Bearer auth backed by a cached, automatically renewed token.
///
/// Concurrent callers that find the cache stale wait on the same fetch.
pub struct RefreshingTokenAuth<S: TokenSource> {
    source: S,
    refresh_buffer: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl<S: TokenSource> RefreshingTokenAuth<S> {
    /// Create with the default refresh buffer
    pub fn new(source: S) -> Self {
        Self {
            source,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            cached: Mutex::new(None),
        }
    }

    /// Set how long before expiry a token is re-acquired
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Return a valid token, fetching one if the cache is empty or stale
    pub async fn token(&self) -> Result<AccessToken, ClassifiedError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.expires_within(self.refresh_buffer) {
                return Ok(token.clone());
            }
            debug!("Cached access token is about to expire, refreshing");
        }

        let token = self
            .source
            .fetch_token()
            .await
            .map_err(|e| auth_failure(e.message))?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next call fetches a new one
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[async_trait]
impl<S: TokenSource> AuthProvider for RefreshingTokenAuth<S> {
    async fn apply(&self, headers: &mut HeaderMap) -> Result<(), ClassifiedError> {
        let token = self.token().await?;
        let value = format!("Bearer {}", token.secret());
        headers.insert(AUTHORIZATION, sensitive_value(&value)?);
        Ok(())
    }
}
