//! In-memory metrics for executor calls.

use crate::errors::ErrorKind;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector shared by every call made through one executor
#[derive(Debug, Default)]
pub struct MetricsCollector {
    /// Logical calls started, by endpoint
    request_counts: RwLock<HashMap<String, AtomicU64>>,
    /// Terminal failures by error kind
    failures: RwLock<HashMap<ErrorKind, AtomicU64>>,
    attempts: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    throttled: AtomicU64,
    wait_us: AtomicU64,
    quota_exhausted: AtomicU64,
    active_requests: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a logical call.
    ///
    /// The call counts as in flight until the returned guard is dropped,
    /// whether it completed or its future was cancelled.
    #[must_use = "the call stops counting as in flight when the guard is dropped"]
    pub fn record_request_start(&self, endpoint: &str) -> InFlight<'_> {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        self.count_request(endpoint);
        InFlight { metrics: self }
    }

    fn count_request(&self, endpoint: &str) {

        if let Some(count) = self.request_counts.read().get(endpoint) {
            count.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.request_counts
            .write()
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dispatch attempt
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry and the delay slept before it
    pub fn record_retry(&self, delay: Duration) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        self.add_wait(delay);
    }

    /// Record time spent waiting on the rate governor
    pub fn record_governor_wait(&self, waited: Duration) {
        if !waited.is_zero() {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            self.add_wait(waited);
        }
    }

    /// Record a response whose quota headers report nothing remaining
    pub fn record_quota_exhausted(&self) {
        self.quota_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a terminal failure
    pub fn record_failure(&self, kind: ErrorKind) {
        self.failures
            .write()
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn add_wait(&self, waited: Duration) {
        self.wait_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get total request count for an endpoint
    pub fn request_count(&self, endpoint: &str) -> u64 {
        self.request_counts
            .read()
            .get(endpoint)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get terminal failure count for an error kind
    pub fn failure_count(&self, kind: ErrorKind) -> u64 {
        self.failures
            .read()
            .get(&kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self
            .request_counts
            .read()
            .iter()
            .map(|(endpoint, count)| (endpoint.clone(), count.load(Ordering::Relaxed)))
            .collect();
        let failures = self
            .failures
            .read()
            .iter()
            .map(|(kind, count)| (kind.as_str().to_string(), count.load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            requests,
            failures,
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            total_wait_ms: self.wait_us.load(Ordering::Relaxed) / 1_000,
            quota_exhausted: self.quota_exhausted.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.request_counts.write().clear();
        self.failures.write().clear();
        self.attempts.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.throttled.store(0, Ordering::Relaxed);
        self.wait_us.store(0, Ordering::Relaxed);
        self.quota_exhausted.store(0, Ordering::Relaxed);
    }
}

/// Marks one logical call as in flight; see
/// [`MetricsCollector::record_request_start`].
///
/// `reset` leaves the in-flight gauge alone since live guards still own it.
#[derive(Debug)]
pub struct InFlight<'a> {
    metrics: &'a MetricsCollector,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.metrics.active_requests.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the collector's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Logical calls by endpoint
    pub requests: HashMap<String, u64>,
    /// Terminal failures by error kind label
    pub failures: HashMap<String, u64>,
    /// Dispatch attempts
    pub attempts: u64,
    /// Retries
    pub retries: u64,
    /// Successful calls
    pub successes: u64,
    /// Governor acquisitions that had to wait
    pub throttled: u64,
    /// Governor waits plus retry delays
    pub total_wait_ms: u64,
    /// Responses reporting an exhausted server-side quota
    pub quota_exhausted: u64,
    /// Calls in flight
    pub active_requests: u64,
}

impl MetricsSnapshot {
    /// Total terminal failures
    pub fn total_failures(&self) -> u64 {
        self.failures.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_snapshot() {
        let metrics = MetricsCollector::new();

        let first = metrics.record_request_start("GET /contacts");
        metrics.record_attempt();
        metrics.record_governor_wait(Duration::from_millis(250));
        metrics.record_retry(Duration::from_millis(750));
        metrics.record_attempt();
        metrics.record_quota_exhausted();
        metrics.record_success();
        drop(first);

        let second = metrics.record_request_start("GET /contacts");
        metrics.record_attempt();
        metrics.record_governor_wait(Duration::ZERO);
        metrics.record_failure(ErrorKind::NotFound);
        drop(second);

        assert_eq!(metrics.request_count("GET /contacts"), 2);
        assert_eq!(metrics.failure_count(ErrorKind::NotFound), 1);
        assert_eq!(metrics.failure_count(ErrorKind::Timeout), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempts, 3);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.throttled, 1);
        assert_eq!(snapshot.total_wait_ms, 1_000);
        assert_eq!(snapshot.quota_exhausted, 1);
        assert_eq!(snapshot.active_requests, 0);
        assert_eq!(snapshot.failures.get("not_found"), Some(&1));
        assert_eq!(snapshot.total_failures(), 1);
    }

    #[test]
    fn test_in_flight_guard_tracks_unfinished_calls() {
        let metrics = MetricsCollector::new();

        let finished = metrics.record_request_start("GET /a");
        let abandoned = metrics.record_request_start("GET /b");
        assert_eq!(metrics.snapshot().active_requests, 2);

        metrics.record_success();
        drop(finished);
        assert_eq!(metrics.snapshot().active_requests, 1);

        // neither success nor failure recorded, as when the call is cancelled
        drop(abandoned);
        assert_eq!(metrics.snapshot().active_requests, 0);
    }

    #[test]
    fn test_reset_keeps_live_calls() {
        let metrics = MetricsCollector::new();
        let in_flight = metrics.record_request_start("POST /lists");
        metrics.record_attempt();
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert!(snapshot.requests.is_empty());
        assert_eq!(snapshot.attempts, 0);
        assert_eq!(snapshot.active_requests, 1);

        drop(in_flight);
        assert_eq!(metrics.snapshot().active_requests, 0);
    }
}
