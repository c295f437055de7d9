//! Resilience patterns: rate governing, retry and the executor tying them
//! together.

mod orchestrator;
mod rate_limiter;
mod retry;

pub use orchestrator::{RequestExecutor, RequestExecutorBuilder};
pub use rate_limiter::{
    FixedIntervalGovernor, GovernorConfig, GovernorStats, RateGovernor, RateLimitHeaders,
    SlidingWindowGovernor, TokenBucketGovernor, UnlimitedGovernor,
};
pub use retry::{RetryConfig, RetryContext, RetryDecision, RetryPolicy};
