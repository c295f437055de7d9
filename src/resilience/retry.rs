//! Retry policy with exponential backoff.

use crate::errors::ClassifiedError;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Double the delay on every retry
    pub exponential_backoff: bool,
    /// Upper bound for computed delays; server-requested waits are not capped
    pub max_delay: Option<Duration>,
    /// Jitter factor (0.0 to 1.0) applied to computed delays
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            exponential_backoff: true,
            max_delay: None,
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that never retries
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Enable or disable exponential backoff
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    /// Cap computed delays
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Total attempts this configuration allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows attempt `attempt` (0-based).
    ///
    /// `base_delay * 2^attempt` with exponential backoff, `base_delay`
    /// otherwise; then capped and jittered.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = if self.exponential_backoff {
            let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        };

        let delay = match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        };

        if self.jitter > 0.0 {
            let range = delay.as_secs_f64() * self.jitter;
            let offset = rand::random::<f64>() * range * 2.0 - range;
            Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
        } else {
            delay
        }
    }
}

/// Per-call retry bookkeeping, fresh for every `execute`.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Current attempt number (0-based)
    pub attempt: u32,
    /// The error from the last attempt
    pub last_error: Option<ClassifiedError>,
    /// Time spent waiting so far, on the governor and between retries
    pub total_wait: Duration,
}

impl RetryContext {
    /// Start a new context
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attempts made, counting the current one
    pub fn attempts(&self) -> u32 {
        self.attempt + 1
    }

    /// Add time spent waiting
    pub fn record_wait(&mut self, waited: Duration) {
        self.total_wait = self.total_wait.saturating_add(waited);
    }

    /// Record a failed attempt and move to the next one
    pub fn advance(&mut self, error: ClassifiedError) {
        self.last_error = Some(error);
        self.attempt += 1;
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then try again
    Retry {
        /// Time to wait before the next attempt
        delay: Duration,
    },
    /// Give up and surface the error
    Stop,
}

/// Decides whether and when a failed attempt is retried.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from a configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide what follows `error`, raised by attempt `context.attempt`.
    ///
    /// A server-provided retry-after always wins over the computed backoff.
    pub fn decide(&self, error: &ClassifiedError, context: &RetryContext) -> RetryDecision {
        if !error.is_retryable() || context.attempt >= self.config.max_retries {
            return RetryDecision::Stop;
        }

        let delay = error
            .retry_after()
            .unwrap_or_else(|| self.config.backoff_delay(context.attempt));

        RetryDecision::Retry { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorDetail;

    fn server_error() -> ClassifiedError {
        ClassifiedError::ServerError {
            status: 503,
            detail: ErrorDetail::Empty,
        }
    }

    fn context_at(attempt: u32) -> RetryContext {
        RetryContext {
            attempt,
            ..RetryContext::default()
        }
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_millis(500));
        assert!(config.exponential_backoff);
        assert_eq!(config.max_attempts(), 4);
    }

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig::new().with_base_delay(Duration::from_millis(100));

        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_constant_backoff() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(2))
            .with_exponential_backoff(false);

        assert_eq!(config.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(5), Duration::from_secs(2));
    }

    #[test]
    fn test_max_delay_caps_backoff() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(config.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(5));
        assert_eq!(config.backoff_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(1))
            .with_exponential_backoff(false)
            .with_jitter(0.5);

        for _ in 0..50 {
            let delay = config.backoff_delay(0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
        assert_eq!(RetryConfig::new().with_jitter(7.0).jitter, 1.0);
    }

    #[test]
    fn test_retryable_errors_retry_until_exhausted() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(100)),
        );

        assert_eq!(
            policy.decide(&server_error(), &context_at(0)),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.decide(&server_error(), &context_at(1)),
            RetryDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(
            policy.decide(&server_error(), &context_at(2)),
            RetryDecision::Stop
        );
    }

    #[test]
    fn test_non_retryable_errors_stop() {
        let policy = RetryPolicy::default();
        let errors = [
            ClassifiedError::Authentication {
                status: Some(401),
                detail: ErrorDetail::Empty,
            },
            ClassifiedError::NotFound {
                status: 404,
                detail: ErrorDetail::Empty,
            },
            ClassifiedError::Validation {
                status: Some(422),
                detail: ErrorDetail::Empty,
            },
            ClassifiedError::Unknown {
                status: 409,
                detail: ErrorDetail::Empty,
            },
        ];

        for error in &errors {
            assert_eq!(policy.decide(error, &context_at(0)), RetryDecision::Stop);
        }
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(20)),
        );
        let error = ClassifiedError::RateLimited {
            status: 429,
            retry_after: Some(Duration::from_secs(3)),
            detail: ErrorDetail::Empty,
        };

        assert_eq!(
            policy.decide(&error, &context_at(1)),
            RetryDecision::Retry {
                delay: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn test_rate_limited_without_hint_uses_backoff() {
        let policy = RetryPolicy::new(RetryConfig::new().with_base_delay(Duration::from_secs(1)));
        let error = ClassifiedError::RateLimited {
            status: 429,
            retry_after: None,
            detail: ErrorDetail::Empty,
        };

        assert_eq!(
            policy.decide(&error, &context_at(2)),
            RetryDecision::Retry {
                delay: Duration::from_secs(4)
            }
        );
    }

    #[test]
    fn test_context_bookkeeping() {
        let mut context = RetryContext::new();
        context.record_wait(Duration::from_millis(250));
        context.advance(server_error());
        context.record_wait(Duration::from_millis(750));

        assert_eq!(context.attempt, 1);
        assert_eq!(context.attempts(), 2);
        assert_eq!(context.total_wait, Duration::from_secs(1));
        assert_eq!(context.last_error, Some(server_error()));
    }

    #[test]
    fn test_no_retry_config() {
        let policy = RetryPolicy::new(RetryConfig::no_retry());
        assert_eq!(policy.decide(&server_error(), &context_at(0)), RetryDecision::Stop);
    }
}
