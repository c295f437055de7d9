//! Client-side rate governors.
//!
//! Every dispatch attempt passes through [`RateGovernor::acquire`]. The
//! check-and-update of each governor's state happens under a short
//! `parking_lot` lock that is never held across an `.await`; a slot is only
//! recorded once the caller is actually allowed through, so a caller that is
//! cancelled while sleeping leaves the state exactly as it found it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Gate that paces outbound calls to stay within a provider's quota.
#[async_trait]
pub trait RateGovernor: Send + Sync + fmt::Debug {
    /// Wait until a dispatch slot is available and claim it.
    ///
    /// Never fails. Returns how long the caller was held back.
    async fn acquire(&self) -> Duration;

    /// Counters describing past acquisitions
    fn stats(&self) -> GovernorStats;
}

/// Counters shared by all governors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GovernorStats {
    /// Slots granted
    pub granted: u64,
    /// Grants that had to wait at least once
    pub throttled: u64,
    /// Total time callers spent waiting
    pub total_wait: Duration,
}

#[derive(Debug, Default)]
struct StatsRecorder {
    granted: AtomicU64,
    throttled: AtomicU64,
    total_wait_us: AtomicU64,
}

impl StatsRecorder {
    fn record_grant(&self, waited: Duration) {
        self.granted.fetch_add(1, Ordering::Relaxed);
        if !waited.is_zero() {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            self.total_wait_us
                .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> GovernorStats {
        GovernorStats {
            granted: self.granted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            total_wait: Duration::from_micros(self.total_wait_us.load(Ordering::Relaxed)),
        }
    }
}

/// Outcome of one locked check against a governor's state
enum Slot {
    Granted,
    Wait(Duration),
}

/// Shared acquire loop: check under the lock, sleep outside it, re-check.
async fn acquire_with<F>(kind: &'static str, stats: &StatsRecorder, mut try_claim: F) -> Duration
where
    F: FnMut(Instant) -> Slot + Send,
{
    let started = Instant::now();
    loop {
        match try_claim(Instant::now()) {
            Slot::Granted => {
                let waited = started.elapsed();
                stats.record_grant(waited);
                return waited;
            }
            Slot::Wait(wait) => {
                debug!(governor = kind, wait_ms = wait.as_millis() as u64, "Waiting for rate capacity");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Enforces a minimum spacing between consecutive dispatches.
pub struct FixedIntervalGovernor {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    stats: StatsRecorder,
}

impl FixedIntervalGovernor {
    /// Create a governor allowing one dispatch per `min_interval`
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
            stats: StatsRecorder::default(),
        }
    }

    /// Create a governor from a requests-per-second figure
    pub fn per_second(requests: u32) -> Self {
        Self::new(Duration::from_secs(1) / requests.max(1))
    }

    /// Configured spacing
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Instant of the most recent granted dispatch
    pub fn last_call(&self) -> Option<Instant> {
        *self.last_call.lock()
    }

    fn try_claim(&self, now: Instant) -> Slot {
        let mut last_call = self.last_call.lock();
        let elapsed = match *last_call {
            // saturating: a clock reading earlier than the last call counts as zero elapsed
            Some(previous) => now.saturating_duration_since(previous),
            None => self.min_interval,
        };

        if elapsed >= self.min_interval {
            *last_call = Some(now);
            Slot::Granted
        } else {
            Slot::Wait(self.min_interval - elapsed)
        }
    }
}

#[async_trait]
impl RateGovernor for FixedIntervalGovernor {
    async fn acquire(&self) -> Duration {
        acquire_with("fixed_interval", &self.stats, |now| self.try_claim(now)).await
    }

    fn stats(&self) -> GovernorStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for FixedIntervalGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedIntervalGovernor")
            .field("min_interval", &self.min_interval)
            .field("last_call", &self.last_call())
            .finish()
    }
}

/// Allows at most `max_requests` dispatches in any trailing `window`.
pub struct SlidingWindowGovernor {
    max_requests: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
    stats: StatsRecorder,
}

impl SlidingWindowGovernor {
    /// Create a governor; `max_requests` is raised to at least one
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let max_requests = max_requests.max(1) as usize;
        Self {
            max_requests,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_requests)),
            stats: StatsRecorder::default(),
        }
    }

    /// Configured quota
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Configured window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Dispatch instants currently recorded, oldest first
    pub fn recorded_calls(&self) -> Vec<Instant> {
        self.calls.lock().iter().copied().collect()
    }

    /// Slots available right now
    pub fn remaining(&self) -> usize {
        let mut calls = self.calls.lock();
        Self::prune(&mut calls, Instant::now(), self.window);
        self.max_requests.saturating_sub(calls.len())
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = calls.front() {
            if now.saturating_duration_since(*oldest) >= window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn try_claim(&self, now: Instant) -> Slot {
        let mut calls = self.calls.lock();
        Self::prune(&mut calls, now, self.window);

        if calls.len() < self.max_requests {
            calls.push_back(now);
            return Slot::Granted;
        }

        match calls.front() {
            Some(oldest) => {
                let exits_at = *oldest + self.window;
                Slot::Wait(exits_at.saturating_duration_since(now))
            }
            None => Slot::Wait(Duration::ZERO),
        }
    }
}

#[async_trait]
impl RateGovernor for SlidingWindowGovernor {
    async fn acquire(&self) -> Duration {
        acquire_with("sliding_window", &self.stats, |now| self.try_claim(now)).await
    }

    fn stats(&self) -> GovernorStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for SlidingWindowGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowGovernor")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("recorded", &self.calls.lock().len())
            .finish()
    }
}

/// Token bucket state
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: bursts up to `capacity`, refilling continuously so that
/// `capacity` tokens return every `refill_interval`.
pub struct TokenBucketGovernor {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<TokenBucket>,
    stats: StatsRecorder,
}

impl TokenBucketGovernor {
    /// Create a full bucket
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let interval = refill_interval.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_per_sec: capacity / interval,
            bucket: Mutex::new(TokenBucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            stats: StatsRecorder::default(),
        }
    }

    /// Whole tokens currently available
    pub fn available_tokens(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens.floor() as u32
    }

    fn refill(&self, bucket: &mut TokenBucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        bucket.last_refill = now;
    }

    fn try_claim(&self, now: Instant) -> Slot {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Slot::Granted
        } else {
            Slot::Wait(self.wait_for(1.0 - bucket.tokens))
        }
    }

    /// Time until `needed` tokens have refilled, never less than a microsecond
    fn wait_for(&self, needed: f64) -> Duration {
        Duration::try_from_secs_f64(needed / self.refill_per_sec)
            .unwrap_or(Duration::MAX)
            .max(Duration::from_micros(1))
    }
}

#[async_trait]
impl RateGovernor for TokenBucketGovernor {
    async fn acquire(&self) -> Duration {
        acquire_with("token_bucket", &self.stats, |now| self.try_claim(now)).await
    }

    fn stats(&self) -> GovernorStats {
        self.stats.snapshot()
    }
}

impl fmt::Debug for TokenBucketGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucketGovernor")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .finish()
    }
}

/// Governor for vendors without a documented quota
#[derive(Debug, Default)]
pub struct UnlimitedGovernor {
    stats: StatsRecorder,
}

impl UnlimitedGovernor {
    /// Create an unlimited governor
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateGovernor for UnlimitedGovernor {
    async fn acquire(&self) -> Duration {
        self.stats.record_grant(Duration::ZERO);
        Duration::ZERO
    }

    fn stats(&self) -> GovernorStats {
        self.stats.snapshot()
    }
}

/// Which governor a client should build.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernorConfig {
    /// At most one dispatch per `min_interval`
    FixedInterval {
        /// Minimum spacing between dispatches
        min_interval: Duration,
    },
    /// At most `max_requests` dispatches in any trailing `window`
    SlidingWindow {
        /// Quota per window
        max_requests: u32,
        /// Window length
        window: Duration,
    },
    /// Bursts up to `capacity`, refilled every `refill_interval`
    TokenBucket {
        /// Bucket size
        capacity: u32,
        /// Time to refill a drained bucket
        refill_interval: Duration,
    },
    /// No client-side limit
    Unlimited,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self::Unlimited
    }
}

impl GovernorConfig {
    /// Build a governor to be shared by every request using one credential
    pub fn build(&self) -> Arc<dyn RateGovernor> {
        match *self {
            Self::FixedInterval { min_interval } => {
                Arc::new(FixedIntervalGovernor::new(min_interval))
            }
            Self::SlidingWindow {
                max_requests,
                window,
            } => Arc::new(SlidingWindowGovernor::new(max_requests, window)),
            Self::TokenBucket {
                capacity,
                refill_interval,
            } => Arc::new(TokenBucketGovernor::new(capacity, refill_interval)),
            Self::Unlimited => Arc::new(UnlimitedGovernor::new()),
        }
    }
}

/// Server-reported quota headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Maximum requests allowed
    pub limit: Option<u64>,
    /// Remaining requests in current window
    pub remaining: Option<u64>,
    /// Reset value as sent by the server (epoch or delta seconds, vendor specific)
    pub reset: Option<u64>,
    /// `Retry-After` delta-seconds, if sent as an integer
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Parse the conventional `X-RateLimit-*` headers
    pub fn from_headers(headers: &http::HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        };

        Self {
            limit: read("x-ratelimit-limit"),
            remaining: read("x-ratelimit-remaining"),
            reset: read("x-ratelimit-reset"),
            retry_after: read("retry-after"),
        }
    }

    /// Returns true if no quota header was present
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset.is_none()
            && self.retry_after.is_none()
    }

    /// Returns true if the server reports an exhausted quota
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}
