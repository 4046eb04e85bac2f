//! Resilient call wrapper tests: retry budget, breaker accounting, timeouts, cancellation

use analytics_core::resilience::{
    BreakerConfig, CircuitState, ResilienceError, ResilientCaller, RetryPolicy,
};
use common::TestError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{advance, sleep};
use tokio_test::{assert_err, assert_ok, assert_pending};

mod common;

async fn failing_call(caller: &ResilientCaller, invocations: &AtomicU32) -> ResilienceError<TestError> {
    caller
        .execute(move || async move {
            invocations.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::Status(503))
        })
        .await
        .expect_err("call should fail")
}

#[tokio::test(start_paused = true)]
async fn test_breaker_cycle_closed_open_half_open_closed() {
    let caller = ResilientCaller::new("upstream", common::test_policy(), common::test_breaker());
    let invocations = AtomicU32::new(0);

    for call in 1..=3u32 {
        let err = failing_call(&caller, &invocations).await;
        assert!(matches!(
            err,
            ResilienceError::Operation { attempts: 4, retryable: true, .. }
        ));
        assert_eq!(invocations.load(Ordering::SeqCst), call * 4);
    }
    assert_eq!(caller.metrics().state, CircuitState::Open);

    let rejected = failing_call(&caller, &invocations).await;
    assert!(rejected.is_circuit_open());
    assert_eq!(rejected.attempts(), 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 12);
    assert_eq!(caller.metrics().rejected_calls, 1);

    sleep(Duration::from_millis(20)).await;

    for _ in 0..2 {
        let value = caller.execute(|| async { Ok::<_, TestError>(42) }).await;
        assert_eq!(assert_ok!(value), 42);
    }

    let metrics = caller.metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.failure_count, 0);
    assert_eq!(metrics.success_count, 0);
    // admitted calls only; the rejection is tracked separately
    assert_eq!(metrics.total_calls, 5);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_uses_whole_budget() {
    let policy = RetryPolicy {
        max_retries: 5,
        ..common::test_policy()
    };
    let caller = common::caller(policy, common::test_breaker());
    let invocations = AtomicU32::new(0);

    let err = failing_call(&caller, &invocations).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 6);
    assert_eq!(err.attempts(), 6);
    assert_eq!(err.label(), "upstream");
    // one logical call, one breaker failure
    assert_eq!(caller.metrics().failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_means_single_attempt() {
    let policy = RetryPolicy {
        max_retries: 0,
        ..common::test_policy()
    };
    let caller = common::caller(policy, common::test_breaker());
    let invocations = AtomicU32::new(0);

    let err = failing_call(&caller, &invocations).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(err.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_stops_immediately() {
    let caller = common::caller(common::test_policy(), common::test_breaker());
    let invocations = AtomicU32::new(0);
    let counter = &invocations;

    let result = caller
        .execute(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::Status(404))
        })
        .await;

    let err = assert_err!(result);
    assert!(matches!(
        err,
        ResilienceError::Operation { attempts: 1, retryable: false, .. }
    ));
    assert!(matches!(err.into_source(), Some(TestError::Status(404))));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(caller.metrics().failure_count, 1);

    let permanent = caller
        .execute(|| async { Err::<(), _>(TestError::Permanent) })
        .await;
    assert_eq!(assert_err!(permanent).attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let caller = common::caller(common::test_policy(), common::test_breaker());
    let invocations = AtomicU32::new(0);
    let counter = &invocations;

    let value = caller
        .execute(move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TestError::Status(429))
            } else {
                Ok("recovered")
            }
        })
        .await;

    assert_eq!(assert_ok!(value), "recovered");
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    let metrics = caller.metrics();
    assert_eq!(metrics.failure_count, 0);
    assert_eq!(metrics.success_count, 1);
    assert!(metrics.last_success_time.is_some());
    assert!(metrics.last_failure_time.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_slow_attempts_time_out_and_count_as_failure() {
    let policy = RetryPolicy {
        max_retries: 2,
        ..common::test_policy()
    };
    let breaker = BreakerConfig {
        timeout: Duration::from_millis(50),
        ..common::test_breaker()
    };
    let caller = common::caller(policy, breaker);
    let invocations = AtomicU32::new(0);
    let counter = &invocations;

    let result = caller
        .execute(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(5)).await;
            Ok::<_, TestError>(())
        })
        .await;

    let err = assert_err!(result);
    assert!(err.is_timeout());
    assert_eq!(err.attempts(), 3);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(caller.metrics().failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_not_retried_when_disabled() {
    let policy = RetryPolicy {
        retry_on_timeout: false,
        ..common::test_policy()
    };
    let breaker = BreakerConfig {
        timeout: Duration::from_millis(50),
        ..common::test_breaker()
    };
    let caller = common::caller(policy, breaker);

    let result = caller
        .execute(|| async {
            sleep(Duration::from_secs(5)).await;
            Ok::<_, TestError>(())
        })
        .await;

    let err = assert_err!(result);
    assert!(err.is_timeout());
    assert_eq!(err.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_trial_call_runs_in_half_open() {
    let caller = common::caller(common::test_policy(), common::test_breaker());
    let invocations = AtomicU32::new(0);
    for _ in 0..3 {
        failing_call(&caller, &invocations).await;
    }

    sleep(Duration::from_millis(20)).await;

    let observer = &caller;
    let observed = caller
        .execute(move || async move { Ok::<_, TestError>(observer.metrics().state) })
        .await;
    assert_eq!(assert_ok!(observed), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens() {
    let caller = common::caller(common::test_policy(), common::test_breaker());
    let invocations = AtomicU32::new(0);
    for _ in 0..3 {
        failing_call(&caller, &invocations).await;
    }
    sleep(Duration::from_millis(20)).await;

    let before = invocations.load(Ordering::SeqCst);
    failing_call(&caller, &invocations).await;
    assert_eq!(invocations.load(Ordering::SeqCst), before + 4);
    assert_eq!(caller.metrics().state, CircuitState::Open);

    assert!(failing_call(&caller, &invocations).await.is_circuit_open());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_call_in_backoff_has_no_effect() {
    let caller = common::caller(common::test_policy(), common::test_breaker());
    let invocations = Arc::new(AtomicU32::new(0));

    let counter = invocations.clone();
    let mut call = tokio_test::task::spawn(caller.execute(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::Status(503))
        }
    }));

    // first attempt fails, the call is now sleeping in backoff
    assert_pending!(call.poll());
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    drop(call);

    advance(Duration::from_secs(1)).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    let metrics = caller.metrics();
    assert_eq!(metrics.failure_count, 0);
    assert_eq!(metrics.success_count, 0);
    assert!(metrics.last_failure_time.is_none());
    assert_eq!(metrics.total_calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_trial_frees_half_open_slot() {
    let breaker = BreakerConfig {
        half_open_max_calls: 1,
        ..common::test_breaker()
    };
    let caller = common::caller(common::test_policy(), breaker);
    let invocations = AtomicU32::new(0);
    for _ in 0..3 {
        failing_call(&caller, &invocations).await;
    }
    sleep(Duration::from_millis(20)).await;

    let mut trial = tokio_test::task::spawn(
        caller.execute(|| async { Err::<(), _>(TestError::Status(503)) }),
    );
    assert_pending!(trial.poll());
    assert_eq!(caller.metrics().state, CircuitState::HalfOpen);
    drop(trial);

    let value = caller.execute(|| async { Ok::<_, TestError>(1) }).await;
    assert_ok!(value);
    assert_eq!(caller.metrics().success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_open_breaker_once() {
    let policy = RetryPolicy {
        max_retries: 0,
        ..common::test_policy()
    };
    let breaker = BreakerConfig {
        failure_threshold: 5,
        ..common::test_breaker()
    };
    let caller = common::caller(policy, breaker);

    let calls = (0..20).map(|_| {
        caller.execute(|| async {
            tokio::task::yield_now().await;
            Err::<(), _>(TestError::Status(500))
        })
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| r.is_err()));
    let metrics = caller.metrics();
    assert_eq!(metrics.state, CircuitState::Open);
    assert_eq!(metrics.failure_count, 0);
    assert_eq!(metrics.total_calls + metrics.rejected_calls, 20);

    let rejected = caller.execute(|| async { Ok::<_, TestError>(()) }).await;
    assert!(assert_err!(rejected).is_circuit_open());
}

#[tokio::test]
async fn test_many_tasks_share_one_breaker() {
    let caller = common::caller(common::test_policy(), common::test_breaker());

    let mut set = tokio::task::JoinSet::new();
    for i in 0..64u32 {
        let caller = caller.clone();
        set.spawn(async move { caller.execute(|| async move { Ok::<_, TestError>(i) }).await });
    }
    while let Some(result) = set.join_next().await {
        assert_ok!(result.expect("task panicked"));
    }

    let metrics = caller.metrics();
    assert_eq!(metrics.total_calls, 64);
    assert_eq!(metrics.success_count, 64);
    assert_eq!(metrics.state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_reset_restores_closed_state() {
    let caller = common::caller(common::test_policy(), common::test_breaker());
    let invocations = AtomicU32::new(0);
    for _ in 0..3 {
        failing_call(&caller, &invocations).await;
    }
    assert_eq!(caller.metrics().state, CircuitState::Open);

    caller.reset();

    let metrics = caller.metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.failure_count, 0);
    assert_eq!(metrics.success_count, 0);
    let value = caller.execute(|| async { Ok::<_, TestError>(7) }).await;
    assert_eq!(assert_ok!(value), 7);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_open_error_names_label() {
    let breaker = BreakerConfig {
        failure_threshold: 1,
        ..common::test_breaker()
    };
    let caller = ResilientCaller::new("geo-lookup", RetryPolicy::default(), breaker);
    let _ = caller
        .execute(|| async { Err::<(), _>(TestError::Permanent) })
        .await;

    let err = assert_err!(caller.execute(|| async { Ok::<_, TestError>(()) }).await);
    assert_eq!(err.label(), "geo-lookup");
    assert_eq!(err.to_string(), "Circuit breaker 'geo-lookup' is open, call rejected");
}
