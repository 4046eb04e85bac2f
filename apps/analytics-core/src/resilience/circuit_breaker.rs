//! Circuit Breaker Implementation
//! Fails fast while an upstream dependency is unhealthy
//!
//! All state lives behind one mutex. The lock is only held for short
//! synchronous updates and never across an `.await`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Deadline for a single attempt
    pub timeout: Duration,
    pub reset_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 2,
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid("failure threshold must be at least 1".into()));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid("success threshold must be at least 1".into()));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid("half-open max calls must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("attempt timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerOptions {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Per-attempt timeout in milliseconds
    pub timeout: u64,
    pub reset_timeout_ms: u64,
    /// Defaults to `success_threshold` when absent
    pub half_open_max_calls: Option<u32>,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        let config = BreakerConfig::default();
        Self {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            timeout: config.timeout.as_millis() as u64,
            reset_timeout_ms: config.reset_timeout.as_millis() as u64,
            half_open_max_calls: None,
        }
    }
}

impl TryFrom<BreakerOptions> for BreakerConfig {
    type Error = ConfigError;

    fn try_from(options: BreakerOptions) -> Result<Self, Self::Error> {
        let config = BreakerConfig {
            failure_threshold: options.failure_threshold,
            success_threshold: options.success_threshold,
            timeout: Duration::from_millis(options.timeout),
            reset_timeout: Duration::from_millis(options.reset_timeout_ms),
            half_open_max_calls: options
                .half_open_max_calls
                .unwrap_or(options.success_threshold),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Point-in-time copy of a breaker's counters.
///
/// `total_calls` counts calls admitted past the breaker; calls refused while
/// open are only counted in `rejected_calls`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    pub label: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub failure_count: u32,
    pub success_count: u32,
    pub rejected_calls: u64,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Why the breaker refused a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub state: CircuitState,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    total_calls: u64,
    rejected_calls: u64,
    // bumped on every transition; outcomes from an older generation are stale
    generation: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_in_flight: 0,
            opened_at: None,
            last_failure_time: None,
            last_success_time: None,
            total_calls: 0,
            rejected_calls: 0,
            generation: 0,
        }
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_in_flight = 0;
        self.opened_at = (to == CircuitState::Open).then(Instant::now);
        self.generation += 1;
    }
}

pub struct CircuitBreaker {
    label: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(label: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            label: label.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission check. An open breaker whose reset timeout has elapsed moves
    /// to half-open here, before the trial call runs.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, Rejection> {
        let mut inner = self.lock();
        let mut moved_to_half_open = false;

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or(Duration::MAX);
            if elapsed < self.config.reset_timeout {
                inner.rejected_calls = inner.rejected_calls.saturating_add(1);
                drop(inner);
                self.on_rejected(CircuitState::Open);
                return Err(Rejection { state: CircuitState::Open });
            }
            inner.transition(CircuitState::HalfOpen);
            moved_to_half_open = true;
        }

        let trial = inner.state == CircuitState::HalfOpen;
        if trial {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.rejected_calls = inner.rejected_calls.saturating_add(1);
                drop(inner);
                self.on_rejected(CircuitState::HalfOpen);
                return Err(Rejection { state: CircuitState::HalfOpen });
            }
            inner.half_open_in_flight += 1;
        }

        inner.total_calls = inner.total_calls.saturating_add(1);
        let generation = inner.generation;
        drop(inner);

        if moved_to_half_open {
            self.on_transition(CircuitState::HalfOpen);
        }

        Ok(BreakerPermit {
            breaker: self,
            generation,
            trial,
            settled: false,
        })
    }

    fn record_success(&self, generation: u64, trial: bool) {
        let mut inner = self.lock();
        inner.last_success_time = Some(Utc::now());

        if generation != inner.generation {
            debug!(label = %self.label, "Ignoring success from a previous breaker generation");
            return;
        }
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        let mut closed = false;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = inner.success_count.saturating_add(1);
            }
            CircuitState::HalfOpen => {
                inner.success_count = inner.success_count.saturating_add(1);
                if inner.success_count >= self.config.success_threshold {
                    inner.transition(CircuitState::Closed);
                    closed = true;
                }
            }
            CircuitState::Open => {}
        }
        drop(inner);

        if closed {
            self.on_transition(CircuitState::Closed);
        }
    }

    fn record_failure(&self, generation: u64, trial: bool) {
        let mut inner = self.lock();
        inner.last_failure_time = Some(Utc::now());

        if generation != inner.generation {
            debug!(label = %self.label, "Ignoring failure from a previous breaker generation");
            return;
        }
        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        let mut opened_from = None;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open);
                    opened_from = Some(CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open);
                opened_from = Some(CircuitState::HalfOpen);
            }
            CircuitState::Open => {}
        }
        drop(inner);

        match opened_from {
            Some(CircuitState::HalfOpen) => {
                warn!(label = %self.label, "Circuit breaker re-opened from half-open");
                self.export_state(CircuitState::Open);
            }
            Some(_) => self.on_transition(CircuitState::Open),
            None => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if generation == inner.generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Forces the breaker closed and zeroes every counter
    pub fn reset(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        let generation = inner.generation + 1;
        *inner = BreakerInner::new();
        inner.generation = generation;
        drop(inner);

        info!(label = %self.label, previous = %previous, "Circuit breaker manually reset");
        self.export_state(CircuitState::Closed);
    }

    pub fn snapshot(&self) -> BreakerMetrics {
        let inner = self.lock();
        BreakerMetrics {
            label: self.label.clone(),
            state: inner.state,
            total_calls: inner.total_calls,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            rejected_calls: inner.rejected_calls,
            last_success_time: inner.last_success_time,
            last_failure_time: inner.last_failure_time,
        }
    }

    fn on_transition(&self, to: CircuitState) {
        match to {
            CircuitState::HalfOpen => {
                info!(label = %self.label, "Circuit breaker transitioning to half-open")
            }
            CircuitState::Closed => info!(label = %self.label, "Circuit breaker closed after recovery"),
            CircuitState::Open => warn!(
                label = %self.label,
                failure_threshold = self.config.failure_threshold,
                "Circuit breaker opened"
            ),
        }
        self.export_state(to);
    }

    fn on_rejected(&self, state: CircuitState) {
        debug!(label = %self.label, state = %state, "Circuit breaker rejected call");
        if let Some(ref m) = *metrics::get_metrics() {
            m.breaker_rejections_total.with_label_values(&[&self.label]).inc();
        }
    }

    fn export_state(&self, state: CircuitState) {
        if let Some(ref m) = *metrics::get_metrics() {
            m.circuit_breaker_state
                .with_label_values(&[&self.label])
                .set(state.as_gauge());
        }
    }
}

/// Proof of admission. Consumed by reporting exactly one outcome; dropping it
/// unreported (an abandoned call) frees its trial slot and records nothing.
#[must_use = "report the call outcome with success() or failure()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.generation, self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.generation, self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}
