//! Policy Chain Tests
//!
//! Tests for:
//! - Timeout wrapping a retry sequence (one deadline overall)
//! - Retry wrapping a timeout (one deadline per attempt)
//! - Attempt telemetry reaching the after-execute hook
//! - Nested composites

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;

use af_policy::{
    operation, retry_if, CompositePolicy, Context, Operation, Policy, PolicyError, RetryData,
    RetryPolicy, TimeoutPolicy, RETRY_POLICY_NAME,
};

fn always_failing(calls: Arc<AtomicU32>) -> Operation {
    operation(move |_ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PolicyError::msg("downstream unavailable"))
        }
    })
}

fn always_slow(calls: Arc<AtomicU32>, sleep: Duration) -> Operation {
    operation(move |_ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(sleep).await;
            Ok(())
        }
    })
}

#[tokio::test(start_paused = true)]
async fn timeout_outside_retry_bounds_whole_sequence() {
    let calls = Arc::new(AtomicU32::new(0));
    let composite = CompositePolicy::builder()
        .policy(Arc::new(TimeoutPolicy::from_secs(1)))
        .policy(Arc::new(RetryPolicy::always(5, Duration::from_secs(1))))
        .build();

    let started = Instant::now();
    let err = composite
        .execute(Context::background(), always_failing(calls.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, PolicyError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert!(calls.load(Ordering::SeqCst) < 6);
}

#[tokio::test(start_paused = true)]
async fn retry_outside_timeout_bounds_each_attempt() {
    let calls = Arc::new(AtomicU32::new(0));
    let composite = CompositePolicy::builder()
        .policy(Arc::new(RetryPolicy::always(2, Duration::ZERO)))
        .policy(Arc::new(TimeoutPolicy::from_secs(1)))
        .build();

    let started = Instant::now();
    let err = composite
        .execute(
            Context::background(),
            always_slow(calls.clone(), Duration::from_secs(5)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PolicyError::DeadlineExceeded));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(4));

    let data: RetryData = composite.collector().get_as(RETRY_POLICY_NAME).unwrap();
    assert_eq!(data, RetryData { attempts: 2, max: 2 });
}

#[tokio::test]
async fn after_execute_sees_attempts_and_duration() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();

    let composite = CompositePolicy::builder()
        .timeout(Duration::from_secs(5))
        .retry(3, Duration::ZERO, Some(retry_if(|err| !err.is_context_error())))
        .after_execute(move |_, collector| {
            let retry: RetryData = collector.get_as(RETRY_POLICY_NAME).unwrap();
            *sink.lock() = Some((retry.attempts, retry.max, collector.duration_ms()));
        })
        .build();

    let counter = calls.clone();
    let op = operation(move |_ctx| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PolicyError::msg("flaky"))
            } else {
                Ok(())
            }
        }
    });

    composite.execute(Context::background(), op).await.unwrap();

    let recorded = *seen.lock();
    let (attempts, max, _duration) = recorded.expect("after_execute ran");
    assert_eq!(attempts, 2);
    assert_eq!(max, 3);
}

#[tokio::test]
async fn non_retryable_error_escapes_chain_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let composite = CompositePolicy::builder()
        .timeout(Duration::from_secs(5))
        .retry(
            5,
            Duration::from_millis(10),
            Some(retry_if(|err| !err.to_string().contains("forbidden"))),
        )
        .build();

    let counter = calls.clone();
    let op = operation(move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PolicyError::msg("forbidden: not a process manager"))
        }
    });

    let err = composite.execute(Context::background(), op).await.unwrap_err();
    assert!(err.to_string().contains("forbidden"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn composites_nest_recursively() {
    let calls = Arc::new(AtomicU32::new(0));
    let inner: Arc<dyn Policy> = Arc::new(
        CompositePolicy::builder()
            .policy(Arc::new(RetryPolicy::always(1, Duration::ZERO)))
            .build(),
    );
    let outer = CompositePolicy::builder()
        .policy(Arc::new(RetryPolicy::always(1, Duration::ZERO)))
        .policy(inner)
        .build();

    assert!(outer
        .execute(Context::background(), always_failing(calls.clone()))
        .await
        .is_err());

    // 2 outer attempts x 2 inner attempts
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn cancelled_caller_stops_chain() {
    let calls = Arc::new(AtomicU32::new(0));
    let composite = CompositePolicy::builder()
        .retry(10, Duration::from_secs(30), Some(retry_if(|_| true)))
        .timeout(Duration::from_secs(30))
        .build();

    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = composite
        .execute(ctx, always_failing(calls.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, PolicyError::Canceled));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
