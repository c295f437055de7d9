//! End-to-end timing properties of the executor, on tokio's paused clock.

use futures::future::join_all;
use integrations_request_core::errors::ErrorKind;
use integrations_request_core::mocks::{MockResponse, MockTransport};
use integrations_request_core::resilience::{
    FixedIntervalGovernor, GovernorConfig, RateGovernor, SlidingWindowGovernor,
};
use integrations_request_core::{RawResponse, RequestDescriptor, RequestExecutor, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use test_case::test_case;
use tokio::time::Instant;

fn executor_with(
    mock: &Arc<MockTransport>,
    governor: Arc<dyn RateGovernor>,
    retry: RetryConfig,
) -> RequestExecutor {
    RequestExecutor::builder(mock.clone())
        .governor(governor)
        .retry(retry)
        .build()
}

#[test_case(1; "no throttling")]
#[test_case(2; "one throttle")]
#[test_case(4; "three throttles")]
#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honored(attempts: u32) {
    let mock = Arc::new(MockTransport::new());
    for _ in 1..attempts {
        mock.push_response(MockResponse::rate_limited(3));
    }
    mock.push_response(RawResponse::new(200, r#"{"ok": true}"#));

    let executor = executor_with(
        &mock,
        GovernorConfig::Unlimited.build(),
        RetryConfig::new()
            .with_max_retries(5)
            .with_base_delay(Duration::from_millis(10)),
    );

    let start = Instant::now();
    let body: serde_json::Value = executor
        .execute(&RequestDescriptor::get("/lists"))
        .await
        .unwrap();

    assert_eq!(body["ok"], true);
    assert_eq!(mock.call_count(), attempts as usize);
    assert!(start.elapsed() >= Duration::from_secs(3 * u64::from(attempts - 1)));
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_is_not_retried() {
    let mock = Arc::new(MockTransport::new());
    mock.always(MockResponse::error(401, "invalid api key"));

    let executor = executor_with(&mock, GovernorConfig::Unlimited.build(), RetryConfig::default());
    let err = executor
        .execute_raw(&RequestDescriptor::get("/me"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err.status_code(), Some(401));
    assert_eq!(err.attempts(), 1);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_exhaust_retries_with_backoff() {
    let mock = Arc::new(MockTransport::new());
    mock.always(MockResponse::error(500, "internal"));

    let executor = executor_with(
        &mock,
        GovernorConfig::Unlimited.build(),
        RetryConfig::new()
            .with_max_retries(3)
            .with_base_delay(Duration::from_millis(200)),
    );
    let err = executor
        .execute_raw(&RequestDescriptor::post("/contacts").body("{}"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(err.attempts(), 4);
    assert_eq!(err.error().message(), "internal");

    let times = mock.dispatch_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_constant_backoff_without_exponential() {
    let mock = Arc::new(MockTransport::new());
    mock.always(RawResponse::new(503, ""));

    let executor = executor_with(
        &mock,
        GovernorConfig::Unlimited.build(),
        RetryConfig::new()
            .with_max_retries(2)
            .with_base_delay(Duration::from_secs(1))
            .with_exponential_backoff(false),
    );
    executor
        .execute_raw(&RequestDescriptor::get("/"))
        .await
        .unwrap_err();

    let times = mock.dispatch_times();
    assert_eq!(times[1] - times[0], Duration::from_secs(1));
    assert_eq!(times[2] - times[1], Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_fixed_interval_spaces_dispatches() {
    let mock = Arc::new(MockTransport::new());
    mock.always(RawResponse::new(200, "{}"));
    let executor = executor_with(
        &mock,
        Arc::new(FixedIntervalGovernor::new(Duration::from_millis(250))),
        RetryConfig::default(),
    );

    for _ in 0..4 {
        executor
            .execute_raw(&RequestDescriptor::get("/ping"))
            .await
            .unwrap();
    }

    for pair in mock.dispatch_times().windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(250));
    }
}

#[tokio::test(start_paused = true)]
async fn test_sliding_window_third_call_waits_for_window() {
    let mock = Arc::new(MockTransport::new());
    mock.always(RawResponse::new(200, "{}"));
    let executor = executor_with(
        &mock,
        GovernorConfig::SlidingWindow {
            max_requests: 2,
            window: Duration::from_secs(1),
        }
        .build(),
        RetryConfig::default(),
    );

    for _ in 0..3 {
        executor
            .execute_raw(&RequestDescriptor::get("/ping"))
            .await
            .unwrap();
    }

    let times = mock.dispatch_times();
    assert!(times[2] - times[0] >= Duration::from_secs(1));
    assert!(times[1] - times[0] < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_share_the_quota() {
    let mock = Arc::new(MockTransport::new());
    mock.always(RawResponse::new(200, "{}"));
    let executor = executor_with(
        &mock,
        Arc::new(SlidingWindowGovernor::new(3, Duration::from_secs(1))),
        RetryConfig::default(),
    );

    let request = RequestDescriptor::get("/contacts");
    let calls = (0..9).map(|_| executor.execute_raw(&request));
    let results = join_all(calls).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let mut times = mock.dispatch_times();
    times.sort();
    assert_eq!(times.len(), 9);
    for window in times.windows(4) {
        assert!(window[3] - window[0] >= Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_execute_leaves_quota_untouched() {
    let mock = Arc::new(MockTransport::new());
    mock.always(RawResponse::new(200, "{}"));
    let governor = Arc::new(SlidingWindowGovernor::new(1, Duration::from_secs(10)));
    let executor = executor_with(&mock, governor.clone(), RetryConfig::default());

    executor
        .execute_raw(&RequestDescriptor::get("/first"))
        .await
        .unwrap();
    let recorded = governor.recorded_calls();

    let cancelled = tokio::time::timeout(
        Duration::from_secs(2),
        executor.execute_raw(&RequestDescriptor::get("/second")),
    )
    .await;

    assert!(cancelled.is_err());
    assert_eq!(governor.recorded_calls(), recorded);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_network_errors_are_retried() {
    use integrations_request_core::errors::TransportError;

    let mock = Arc::new(MockTransport::new());
    mock.push_error(TransportError::Connect {
        message: "connection refused".to_string(),
    })
    .push_error(TransportError::Timeout {
        message: "timed out".to_string(),
    })
    .push_response(RawResponse::new(204, ""));

    let executor = executor_with(
        &mock,
        GovernorConfig::Unlimited.build(),
        RetryConfig::new().with_base_delay(Duration::from_millis(50)),
    );
    let value: serde_json::Value = executor
        .execute(&RequestDescriptor::delete("/contacts/3"))
        .await
        .unwrap();

    assert_eq!(value, serde_json::Value::Null);
    assert_eq!(mock.call_count(), 3);
    assert_eq!(executor.metrics().snapshot().retries, 2);
}
