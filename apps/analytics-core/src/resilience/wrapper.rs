//! Resilient call wrapper
//! Breaker admission, then a retry loop, then exactly one outcome reported to the breaker

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use super::circuit_breaker::{BreakerConfig, BreakerMetrics, CircuitBreaker};
use super::error::{Classify, FailureClass, ResilienceError};
use super::retry::{GiveUpReason, JitterSource, RandomJitter, RetryDecision, RetryPolicy};
use crate::observability::metrics;

/// One caller per protected upstream dependency; owns its breaker exclusively
pub struct ResilientCaller {
    label: String,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    jitter: Arc<dyn JitterSource>,
}

impl ResilientCaller {
    pub fn new(label: impl Into<String>, policy: RetryPolicy, breaker_config: BreakerConfig) -> Self {
        Self::with_jitter(label, policy, breaker_config, Arc::new(RandomJitter))
    }

    pub fn with_jitter(
        label: impl Into<String>,
        policy: RetryPolicy,
        breaker_config: BreakerConfig,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        let label = label.into();
        Self {
            breaker: CircuitBreaker::new(label.clone(), breaker_config),
            label,
            policy,
            jitter,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> BreakerMetrics {
        self.breaker.snapshot()
    }

    pub fn reset(&self) {
        self.breaker.reset();
    }

    /// Run `operation` with retries under this caller's breaker.
    ///
    /// The breaker sees one outcome per call, however many attempts the
    /// retry loop makes. Dropping the returned future abandons the call
    /// without reporting anything.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::error::Error,
    {
        let span = tracing::debug_span!("resilient_call", label = %self.label, call_id = %Uuid::new_v4());
        self.execute_inner(operation).instrument(span).await
    }

    async fn execute_inner<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::error::Error,
    {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                return Err(ResilienceError::CircuitOpen {
                    label: self.label.clone(),
                    state: rejection.state,
                });
            }
        };

        let started = Instant::now();
        let attempt_timeout = self.breaker.config().timeout;
        let mut attempt: u32 = 0;

        loop {
            // Losing the race drops the operation future, cancelling it
            let (class, last_error) = match timeout(attempt_timeout, operation()).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Operation succeeded after retry");
                    }
                    permit.success();
                    self.observe(attempt + 1, "success", started);
                    return Ok(value);
                }
                Ok(Err(e)) => (e.failure_class(), Some(e)),
                Err(_) => (FailureClass::Timeout, None),
            };

            match self.policy.decide(attempt, &class, self.jitter.as_ref()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        failure = ?class,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp(reason) => {
                    let attempts = attempt + 1;
                    warn!(
                        attempts = attempts,
                        failure = ?class,
                        reason = ?reason,
                        "Operation failed, giving up"
                    );
                    permit.failure();
                    self.observe(attempts, "failure", started);

                    return Err(match last_error {
                        Some(source) => ResilienceError::Operation {
                            label: self.label.clone(),
                            attempts,
                            retryable: reason == GiveUpReason::Exhausted,
                            source,
                        },
                        None => ResilienceError::Timeout {
                            label: self.label.clone(),
                            timeout: attempt_timeout,
                            attempts,
                        },
                    });
                }
            }
        }
    }

    fn observe(&self, attempts: u32, outcome: &str, started: Instant) {
        if let Some(ref m) = *metrics::get_metrics() {
            m.retry_attempts_total
                .with_label_values(&[&self.label, outcome])
                .inc_by(f64::from(attempts));
            m.call_duration_seconds
                .with_label_values(&[&self.label, outcome])
                .observe(started.elapsed().as_secs_f64());
        }
    }
}
