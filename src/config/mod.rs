//! Configuration for the request core.
//!
//! Supports configuration via:
//! - Builder pattern
//! - Environment variables, under a per-vendor prefix

use crate::errors::ConfigurationError;
use crate::resilience::{GovernorConfig, RetryConfig};
use crate::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default `User-Agent` sent by executors
pub const DEFAULT_USER_AGENT: &str = concat!("integrations-request-core/", env!("CARGO_PKG_VERSION"));

/// Everything needed to build a [`RequestExecutor`](crate::RequestExecutor)
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL requests are resolved against
    pub base_url: Url,
    /// Whole-request timeout enforced by the HTTP client
    pub timeout: Duration,
    /// Optional per-attempt timeout enforced by the executor
    pub attempt_timeout: Option<Duration>,
    /// Client-side rate limit
    pub governor: GovernorConfig,
    /// Retry behavior
    pub retry: RetryConfig,
    /// Header carrying the server-requested wait on 429
    pub retry_after_header: String,
    /// `User-Agent` header value
    pub user_agent: String,
    /// Headers added to every request unless the request sets them
    pub default_headers: HeaderMap,
    pub(crate) api_token: Option<SecretString>,
}

impl CoreConfig {
    /// Create a new builder
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::new()
    }

    /// Read configuration from `<PREFIX>_*` environment variables
    pub fn from_env(prefix: &str) -> Result<Self, ConfigurationError> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    ///
    /// Recognised variables: `BASE_URL` (required), `API_TOKEN`,
    /// `TIMEOUT_SECS`, `MAX_RETRIES`, `BASE_DELAY_MS`,
    /// `EXPONENTIAL_BACKOFF`, `MIN_INTERVAL_MS`, `MAX_REQUESTS`,
    /// `WINDOW_SECS` and `RETRY_AFTER_HEADER`. `MAX_REQUESTS` selects a
    /// sliding window (one second unless `WINDOW_SECS` is set) and takes
    /// precedence over `MIN_INTERVAL_MS`.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| -> (String, Option<String>) {
            let name = format!("{}_{}", prefix, suffix);
            let value = lookup(&name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
            (name, value)
        };

        let mut builder = CoreConfigBuilder::new();

        if let (_, Some(url)) = var("BASE_URL") {
            builder = builder.base_url(&url)?;
        }
        if let (_, Some(token)) = var("API_TOKEN") {
            builder = builder.api_token(token);
        }
        if let Some(secs) = parse_var::<u64>(var("TIMEOUT_SECS"))? {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let mut retry = RetryConfig::default();
        if let Some(max_retries) = parse_var::<u32>(var("MAX_RETRIES"))? {
            retry = retry.with_max_retries(max_retries);
        }
        if let Some(ms) = parse_var::<u64>(var("BASE_DELAY_MS"))? {
            retry = retry.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(enabled) = parse_var::<bool>(var("EXPONENTIAL_BACKOFF"))? {
            retry = retry.with_exponential_backoff(enabled);
        }
        builder = builder.retry(retry);

        let max_requests = parse_var::<u32>(var("MAX_REQUESTS"))?;
        let window_secs = parse_var::<u64>(var("WINDOW_SECS"))?;
        let min_interval_ms = parse_var::<u64>(var("MIN_INTERVAL_MS"))?;
        if let Some(max_requests) = max_requests {
            builder = builder.sliding_window(
                max_requests,
                Duration::from_secs(window_secs.unwrap_or(1)),
            );
        } else if let Some(ms) = min_interval_ms {
            builder = builder.min_interval(Duration::from_millis(ms));
        }

        if let (_, Some(header)) = var("RETRY_AFTER_HEADER") {
            builder = builder.retry_after_header(header);
        }

        builder.build()
    }

    /// Bearer token, if one was configured
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    /// Check ranges and header names
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.timeout.is_zero() {
            return Err(ConfigurationError::invalid("timeout must be greater than zero"));
        }
        if self.attempt_timeout.map_or(false, |t| t.is_zero()) {
            return Err(ConfigurationError::invalid(
                "attempt_timeout must be greater than zero",
            ));
        }

        match &self.governor {
            GovernorConfig::SlidingWindow {
                max_requests,
                window,
            } => {
                if *max_requests == 0 {
                    return Err(ConfigurationError::invalid("max_requests must be at least 1"));
                }
                if window.is_zero() {
                    return Err(ConfigurationError::invalid("window must be greater than zero"));
                }
            }
            GovernorConfig::TokenBucket {
                capacity,
                refill_interval,
            } => {
                if *capacity == 0 {
                    return Err(ConfigurationError::invalid("capacity must be at least 1"));
                }
                if refill_interval.is_zero() {
                    return Err(ConfigurationError::invalid(
                        "refill_interval must be greater than zero",
                    ));
                }
            }
            GovernorConfig::FixedInterval { .. } | GovernorConfig::Unlimited => {}
        }

        HeaderName::from_str(&self.retry_after_header).map_err(|_| {
            ConfigurationError::invalid(format!(
                "Invalid retry-after header name: {:?}",
                self.retry_after_header
            ))
        })?;
        HeaderValue::from_str(&self.user_agent)
            .map_err(|_| ConfigurationError::invalid("user_agent is not a valid header value"))?;

        Ok(())
    }
}

fn parse_var<T: FromStr>(
    (name, value): (String, Option<String>),
) -> Result<Option<T>, ConfigurationError> {
    match value {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigurationError::EnvVar { name, value }),
    }
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("governor", &self.governor)
            .field("retry", &self.retry)
            .field("retry_after_header", &self.retry_after_header)
            .field("user_agent", &self.user_agent)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Builder for [`CoreConfig`]
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    base_url: Option<Url>,
    timeout: Option<Duration>,
    attempt_timeout: Option<Duration>,
    governor: GovernorConfig,
    retry: Option<RetryConfig>,
    retry_after_header: Option<String>,
    user_agent: Option<String>,
    default_headers: HeaderMap,
    api_token: Option<SecretString>,
}

impl CoreConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL
    pub fn base_url(mut self, url: &str) -> Result<Self, ConfigurationError> {
        self.base_url = Some(Url::parse(url)?);
        Ok(self)
    }

    /// Set the whole-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a per-attempt timeout
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Set the governor
    pub fn governor(mut self, governor: GovernorConfig) -> Self {
        self.governor = governor;
        self
    }

    /// Use a fixed-interval governor
    pub fn min_interval(self, min_interval: Duration) -> Self {
        self.governor(GovernorConfig::FixedInterval { min_interval })
    }

    /// Use a sliding-window governor
    pub fn sliding_window(self, max_requests: u32, window: Duration) -> Self {
        self.governor(GovernorConfig::SlidingWindow {
            max_requests,
            window,
        })
    }

    /// Set the retry configuration
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the maximum number of retries
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        let retry = self.retry.take().unwrap_or_default();
        self.retry = Some(retry.with_max_retries(max_retries));
        self
    }

    /// Set the header read for retry-after hints
    pub fn retry_after_header(mut self, name: impl Into<String>) -> Self {
        self.retry_after_header = Some(name.into());
        self
    }

    /// Set the `User-Agent`
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Add a header sent with every request
    pub fn default_header(mut self, name: &str, value: &str) -> Result<Self, ConfigurationError> {
        let name = HeaderName::from_str(name)
            .map_err(|_| ConfigurationError::invalid(format!("Invalid header name: {:?}", name)))?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            ConfigurationError::invalid(format!("Invalid value for header {}", name))
        })?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Set a bearer token
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(SecretString::new(token.into()));
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CoreConfig, ConfigurationError> {
        let base_url = self.base_url.ok_or(ConfigurationError::Missing("base_url"))?;

        let config = CoreConfig {
            base_url,
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            attempt_timeout: self.attempt_timeout,
            governor: self.governor,
            retry: self
                .retry
                .unwrap_or_else(|| RetryConfig::default().with_max_retries(DEFAULT_MAX_RETRIES)),
            retry_after_header: self
                .retry_after_header
                .unwrap_or_else(|| crate::classifier::DEFAULT_RETRY_AFTER_HEADER.to_string()),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            default_headers: self.default_headers,
            api_token: self.api_token,
        };

        config.validate()?;
        Ok(config)
    }
}
