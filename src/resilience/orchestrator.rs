//! Request executor combining auth, rate governing, classification and retry.

use super::{RateGovernor, RateLimitHeaders, RetryConfig, RetryContext, RetryDecision, RetryPolicy, UnlimitedGovernor};
use crate::auth::{AuthProvider, BearerAuth};
use crate::classifier::ErrorClassifier;
use crate::config::CoreConfig;
use crate::errors::{ClassifiedError, ConfigurationError, RequestError, RequestResult, TransportError};
use crate::observability::{redact_headers, MetricsCollector};
use crate::transport::{HttpTransport, RawResponse, RequestDescriptor, ReqwestTransport};
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::HeaderMap;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Runs requests through the resilient request pipeline.
///
/// Each attempt, retries included: credentials are applied, the governor
/// grants a slot, the transport is called and the outcome classified. A
/// retryable failure sleeps for the policy's delay and starts over.
///
/// Cheap to clone; clones share the governor, transport and metrics.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    governor: Arc<dyn RateGovernor>,
    retry: RetryPolicy,
    classifier: ErrorClassifier,
    auth: Option<Arc<dyn AuthProvider>>,
    default_headers: HeaderMap,
    attempt_timeout: Option<Duration>,
    metrics: Arc<MetricsCollector>,
}

impl RequestExecutor {
    /// Create a builder around `transport`
    pub fn builder(transport: Arc<dyn HttpTransport>) -> RequestExecutorBuilder {
        RequestExecutorBuilder::new(transport)
    }

    /// Build an executor from configuration and an existing transport
    pub fn from_config(
        config: &CoreConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let mut builder = Self::builder(transport)
            .governor(config.governor.build())
            .retry(config.retry.clone())
            .classifier(ErrorClassifier::with_retry_after_header(
                &config.retry_after_header,
            )?)
            .user_agent(&config.user_agent)?;

        for (name, value) in &config.default_headers {
            builder = builder.default_header(name.clone(), value.clone());
        }
        if let Some(timeout) = config.attempt_timeout {
            builder = builder.attempt_timeout(timeout);
        }
        if let Some(token) = config.api_token() {
            builder = builder.auth(BearerAuth::new(token));
        }

        Ok(builder.build())
    }

    /// Build an executor backed by a [`ReqwestTransport`] for `config.base_url`
    pub fn connect(config: &CoreConfig) -> Result<Self, ConfigurationError> {
        let transport = ReqwestTransport::new(config.base_url.clone(), config.timeout)?;
        Self::from_config(config, Arc::new(transport))
    }

    /// The governor gating this executor's dispatches
    pub fn governor(&self) -> &Arc<dyn RateGovernor> {
        &self.governor
    }

    /// Default retry configuration
    pub fn retry_config(&self) -> &RetryConfig {
        self.retry.config()
    }

    /// The classifier applied to every outcome
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Call metrics
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Execute `request` and decode the successful body as `T`.
    ///
    /// An empty or mismatched success body decodes to `T::default()`.
    pub async fn execute<T>(&self, request: &RequestDescriptor) -> RequestResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let response = self.run(request, &self.retry).await?;
        Ok(self.classifier.decode_payload(&response))
    }

    /// Like [`execute`](Self::execute) with a per-call retry configuration
    pub async fn execute_with<T>(
        &self,
        request: &RequestDescriptor,
        retry: &RetryConfig,
    ) -> RequestResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let policy = RetryPolicy::new(retry.clone());
        let response = self.run(request, &policy).await?;
        Ok(self.classifier.decode_payload(&response))
    }

    /// Execute `request` and return the successful response undecoded
    pub async fn execute_raw(&self, request: &RequestDescriptor) -> RequestResult<RawResponse> {
        self.run(request, &self.retry).await
    }

    #[instrument(
        name = "execute",
        skip(self, request, policy),
        fields(method = %request.method, path = %request.path)
    )]
    async fn run(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
    ) -> RequestResult<RawResponse> {
        let _in_flight = self.metrics.record_request_start(&request.endpoint());
        let mut context = RetryContext::new();

        loop {
            match self.attempt(request, &mut context).await {
                Ok(response) => {
                    if context.attempt > 0 {
                        debug!(
                            attempts = context.attempts(),
                            status = response.status,
                            "Request succeeded after retry"
                        );
                    }
                    self.metrics.record_success();
                    return Ok(response);
                }
                Err(error) => match policy.decide(&error, &context) {
                    RetryDecision::Retry { delay } => {
                        debug!(
                            attempt = context.attempt,
                            kind = %error.kind(),
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Retrying request"
                        );
                        self.metrics.record_retry(delay);
                        context.record_wait(delay);
                        context.advance(error);
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::Stop => {
                        warn!(
                            attempts = context.attempts(),
                            kind = %error.kind(),
                            total_wait_ms = context.total_wait.as_millis() as u64,
                            error = %error,
                            "Request failed"
                        );
                        self.metrics.record_failure(error.kind());
                        return Err(RequestError::new(error, context.attempts()));
                    }
                },
            }
        }
    }

    async fn attempt(
        &self,
        request: &RequestDescriptor,
        context: &mut RetryContext,
    ) -> Result<RawResponse, ClassifiedError> {
        let prepared = self.prepare(request).await?;

        let waited = self.governor.acquire().await;
        context.record_wait(waited);
        self.metrics.record_governor_wait(waited);
        self.metrics.record_attempt();

        debug!(
            attempt = context.attempt,
            headers = ?redact_headers(&prepared.headers),
            "Dispatching request"
        );

        let outcome = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.send(&prepared))
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::Timeout {
                        message: format!("no response within {}ms", limit.as_millis()),
                    })
                }),
            None => self.transport.send(&prepared).await,
        };

        if let Ok(response) = &outcome {
            self.observe_quota(response);
        }
        self.classifier.classify(outcome)
    }

    fn observe_quota(&self, response: &RawResponse) {
        let quota = RateLimitHeaders::from_headers(&response.headers);
        if quota.is_empty() {
            return;
        }
        debug!(
            status = response.status,
            limit = ?quota.limit,
            remaining = ?quota.remaining,
            reset = ?quota.reset,
            "Server quota"
        );
        if quota.is_exhausted() {
            warn!(
                status = response.status,
                limit = ?quota.limit,
                reset = ?quota.reset,
                "Server reports quota exhausted"
            );
            self.metrics.record_quota_exhausted();
        }
    }

    /// Per-attempt copy of `request` with default headers and credentials
    async fn prepare(&self, request: &RequestDescriptor) -> Result<RequestDescriptor, ClassifiedError> {
        let mut prepared = request.clone();
        for (name, value) in &self.default_headers {
            if !prepared.headers.contains_key(name) {
                prepared.headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(auth) = &self.auth {
            auth.apply(&mut prepared.headers).await?;
        }
        Ok(prepared)
    }
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("governor", &self.governor)
            .field("retry", self.retry.config())
            .field("classifier", &self.classifier)
            .field("has_auth", &self.auth.is_some())
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

/// Builder for [`RequestExecutor`]
pub struct RequestExecutorBuilder {
    transport: Arc<dyn HttpTransport>,
    governor: Option<Arc<dyn RateGovernor>>,
    retry: RetryConfig,
    classifier: ErrorClassifier,
    auth: Option<Arc<dyn AuthProvider>>,
    default_headers: HeaderMap,
    attempt_timeout: Option<Duration>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RequestExecutorBuilder {
    /// Create a builder; without a governor the executor is unlimited
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            governor: None,
            retry: RetryConfig::default(),
            classifier: ErrorClassifier::default(),
            auth: None,
            default_headers: HeaderMap::new(),
            attempt_timeout: None,
            metrics: None,
        }
    }

    /// Share `governor` with this executor
    pub fn governor(mut self, governor: Arc<dyn RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Set the default retry configuration
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the classifier
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the auth provider
    pub fn auth(self, auth: impl AuthProvider + 'static) -> Self {
        self.shared_auth(Arc::new(auth))
    }

    /// Set an auth provider shared with other executors
    pub fn shared_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Add a header sent unless the request sets it
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Set the `User-Agent`
    pub fn user_agent(self, user_agent: &str) -> Result<Self, ConfigurationError> {
        let value = HeaderValue::from_str(user_agent)
            .map_err(|_| ConfigurationError::invalid("user_agent is not a valid header value"))?;
        Ok(self.default_header(USER_AGENT, value))
    }

    /// Bound each transport call
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Record into an existing collector
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the executor
    pub fn build(self) -> RequestExecutor {
        RequestExecutor {
            transport: self.transport,
            governor: self
                .governor
                .unwrap_or_else(|| Arc::new(UnlimitedGovernor::new())),
            retry: RetryPolicy::new(self.retry),
            classifier: self.classifier,
            auth: self.auth,
            default_headers: self.default_headers,
            attempt_timeout: self.attempt_timeout,
            metrics: self.metrics.unwrap_or_default(),
        }
    }
}
