//! Prometheus Metrics for upstream resilience
//! Breaker state, retries and call latency per protected label

use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Application metrics
pub struct Metrics {
    pub circuit_breaker_state: GaugeVec,
    pub breaker_rejections_total: CounterVec,
    pub retry_attempts_total: CounterVec,
    pub call_duration_seconds: HistogramVec,
}

static METRICS: Lazy<Mutex<Option<Metrics>>> = Lazy::new(|| Mutex::new(None));

/// Initialize metrics. Calling it again after a successful init is a no-op.
pub fn init_metrics(service_name: &str) -> anyhow::Result<()> {
    let mut guard = get_metrics();
    if guard.is_some() {
        return Ok(());
    }

    let circuit_breaker_state = GaugeVec::new(
        Opts::new("circuit_breaker_state", "Circuit breaker state (0=closed, 0.5=half-open, 1=open)")
            .namespace("analytics")
            .const_label("service", service_name),
        &["name"]
    )?;

    let breaker_rejections_total = CounterVec::new(
        Opts::new("breaker_rejections_total", "Calls rejected by an open circuit breaker")
            .namespace("analytics")
            .const_label("service", service_name),
        &["name"]
    )?;

    let retry_attempts_total = CounterVec::new(
        Opts::new("retry_attempts_total", "Upstream attempts, including retries")
            .namespace("analytics")
            .const_label("service", service_name),
        &["operation", "outcome"]
    )?;

    let call_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "call_duration_seconds",
            "Resilient call latency in seconds, retries and backoff included"
        )
            .namespace("analytics")
            .const_label("service", service_name)
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation", "outcome"]
    )?;

    REGISTRY.register(Box::new(circuit_breaker_state.clone()))?;
    REGISTRY.register(Box::new(breaker_rejections_total.clone()))?;
    REGISTRY.register(Box::new(retry_attempts_total.clone()))?;
    REGISTRY.register(Box::new(call_duration_seconds.clone()))?;

    *guard = Some(Metrics {
        circuit_breaker_state,
        breaker_rejections_total,
        retry_attempts_total,
        call_duration_seconds,
    });

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Get metrics instance; `None` until `init_metrics` has run
pub fn get_metrics() -> MutexGuard<'static, Option<Metrics>> {
    METRICS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encode metrics to Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
