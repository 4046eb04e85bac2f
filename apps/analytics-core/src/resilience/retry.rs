//! Retry with Exponential Backoff
//! Decides whether a failed attempt is retried and how long to wait first

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::error::{FailureClass, TransportErrorKind};
use crate::config::ConfigError;

pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Source of the random component added to each backoff delay
pub trait JitterSource: Send + Sync {
    /// Returns a duration in `[0, bound]`
    fn sample(&self, bound: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, bound: Duration) -> Duration {
        if bound.is_zero() {
            return Duration::ZERO;
        }
        let upper = u64::try_from(bound.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rand::thread_rng().gen_range(0..=upper))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self, _bound: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Always returns the same value, capped at the bound
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn sample(&self, bound: Duration) -> Duration {
        self.0.min(bound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    NotRetryable,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: Duration,
    pub retryable_status_codes: HashSet<u16>,
    pub retryable_transport: HashSet<TransportErrorKind>,
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            exponential_base: 2.0,
            jitter: Duration::from_millis(100),
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            retryable_transport: [
                TransportErrorKind::Connect,
                TransportErrorKind::ConnectionReset,
                TransportErrorKind::TimedOut,
            ]
            .into_iter()
            .collect(),
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay > self.max_delay {
            return Err(ConfigError::Invalid(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "exponential base must be a finite number >= 1.0, got {}",
                self.exponential_base
            )));
        }
        Ok(())
    }

    pub fn is_retryable(&self, class: &FailureClass) -> bool {
        match class {
            FailureClass::Status(code) => self.retryable_status_codes.contains(code),
            FailureClass::Transport(kind) => self.retryable_transport.contains(kind),
            FailureClass::Timeout => self.retry_on_timeout,
            FailureClass::Permanent => false,
        }
    }

    /// `min(max_delay, base_delay * exponential_base^attempt) + jitter sample`
    pub fn backoff_delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        // 0 * inf is NaN; a negative base on an odd exponent goes below zero
        let capped = if scaled.is_nan() { 0.0 } else { scaled.clamp(0.0, max_secs) };

        let delay = Duration::try_from_secs_f64(capped)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        delay + jitter.sample(self.jitter)
    }

    /// `attempt` is 0-indexed: the attempt that just failed
    pub fn decide(
        &self,
        attempt: u32,
        class: &FailureClass,
        jitter: &dyn JitterSource,
    ) -> RetryDecision {
        if !self.is_retryable(class) {
            return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
        }
        if attempt >= self.max_retries {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted);
        }
        RetryDecision::RetryAfter(self.backoff_delay(attempt, jitter))
    }
}

/// Retry settings as callers spell them (`maxRetries`, `baseDelayMs`, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter_ms: u64,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        let mut codes: Vec<u16> = policy.retryable_status_codes.into_iter().collect();
        codes.sort_unstable();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            exponential_base: policy.exponential_base,
            jitter_ms: policy.jitter.as_millis() as u64,
            retryable_status_codes: codes,
        }
    }
}

impl TryFrom<RetryOptions> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(options: RetryOptions) -> Result<Self, Self::Error> {
        let policy = RetryPolicy {
            max_retries: options.max_retries,
            base_delay: Duration::from_millis(options.base_delay_ms),
            max_delay: Duration::from_millis(options.max_delay_ms),
            exponential_base: options.exponential_base,
            jitter: Duration::from_millis(options.jitter_ms),
            retryable_status_codes: options.retryable_status_codes.into_iter().collect(),
            ..RetryPolicy::default()
        };
        policy.validate()?;
        Ok(policy)
    }
}
