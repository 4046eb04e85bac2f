//! Shared helpers for the resilience integration tests

#![allow(dead_code)]

use analytics_core::resilience::{
    BreakerConfig, Classify, FailureClass, NoJitter, ResilientCaller, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TestError {
    #[error("upstream status {0}")]
    Status(u16),
    #[error("rejected input")]
    Permanent,
}

impl Classify for TestError {
    fn failure_class(&self) -> FailureClass {
        match self {
            TestError::Status(code) => FailureClass::Status(*code),
            TestError::Permanent => FailureClass::Permanent,
        }
    }
}

/// maxRetries 3, baseDelayMs 10, maxDelayMs 100, jitterMs 5
pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        jitter: Duration::from_millis(5),
        ..RetryPolicy::default()
    }
}

/// failureThreshold 3, successThreshold 2, resetTimeoutMs 20
pub fn test_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        timeout: Duration::from_millis(500),
        reset_timeout: Duration::from_millis(20),
        half_open_max_calls: 2,
    }
}

pub fn caller(policy: RetryPolicy, breaker: BreakerConfig) -> Arc<ResilientCaller> {
    Arc::new(ResilientCaller::with_jitter(
        "upstream",
        policy,
        breaker,
        Arc::new(NoJitter),
    ))
}
