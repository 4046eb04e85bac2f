//! Breaker registry: one resilient caller per upstream label

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::circuit_breaker::{BreakerConfig, BreakerMetrics};
use super::error::{Classify, ResilienceError};
use super::retry::{JitterSource, RandomJitter, RetryPolicy};
use super::wrapper::ResilientCaller;

pub struct ResilienceRegistry {
    policy: RetryPolicy,
    breaker_config: BreakerConfig,
    jitter: Arc<dyn JitterSource>,
    callers: RwLock<HashMap<String, Arc<ResilientCaller>>>,
}

impl ResilienceRegistry {
    pub fn new(policy: RetryPolicy, breaker_config: BreakerConfig) -> Self {
        Self::with_jitter(policy, breaker_config, Arc::new(RandomJitter))
    }

    pub fn with_jitter(
        policy: RetryPolicy,
        breaker_config: BreakerConfig,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self {
            policy,
            breaker_config,
            jitter,
            callers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the caller for `label`, creating it on first use
    pub async fn caller(&self, label: &str) -> Arc<ResilientCaller> {
        if let Some(caller) = self.callers.read().await.get(label) {
            return caller.clone();
        }

        let mut callers = self.callers.write().await;
        callers
            .entry(label.to_string())
            .or_insert_with(|| {
                info!(label = label, "Registering circuit breaker");
                Arc::new(ResilientCaller::with_jitter(
                    label,
                    self.policy.clone(),
                    self.breaker_config.clone(),
                    self.jitter.clone(),
                ))
            })
            .clone()
    }

    pub async fn execute<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::error::Error,
    {
        let caller = self.caller(label).await;
        caller.execute(operation).await
    }

    /// Snapshots of every registered breaker, sorted by label
    pub async fn snapshots(&self) -> Vec<BreakerMetrics> {
        let callers = self.callers.read().await;
        let mut out: Vec<BreakerMetrics> = callers.values().map(|c| c.metrics()).collect();
        out.sort_by(|a, b| a.label.cmp(&b.label));
        out
    }

    /// Returns false when no breaker is registered under `label`
    pub async fn reset(&self, label: &str) -> bool {
        match self.callers.read().await.get(label) {
            Some(caller) => {
                caller.reset();
                true
            }
            None => false,
        }
    }

    pub async fn reset_all(&self) {
        for caller in self.callers.read().await.values() {
            caller.reset();
        }
    }
}
