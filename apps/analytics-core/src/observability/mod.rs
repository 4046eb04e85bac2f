//! Observability Module - Structured Logging, Metrics, optional OTLP tracing

pub mod health;
pub mod metrics;
pub mod tracing_setup;

use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Initialize logging, metrics and (when configured) span export
pub fn init_observability(service_name: &str, config: &Config) -> anyhow::Result<()> {
    let tracer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => Some(tracing_setup::init_tracer(service_name, endpoint, &config.environment)?),
        None => None,
    };

    metrics::init_metrics(service_name)?;

    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,analytics_core=debug"));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(telemetry_layer)
        .init();

    tracing::info!(
        service = service_name,
        otlp = config.otlp_endpoint.is_some(),
        "Observability stack initialized"
    );

    Ok(())
}

/// Flush pending spans before exit
pub fn shutdown_observability() {
    tracing::info!("Shutting down observability...");
    global::shutdown_tracer_provider();
}
