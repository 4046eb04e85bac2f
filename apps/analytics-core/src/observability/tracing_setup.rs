//! OpenTelemetry Tracing Configuration
//! OTLP span export, enabled only when an endpoint is configured

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};

/// Initialize an OpenTelemetry tracer exporting to `otlp_endpoint`
pub fn init_tracer(
    service_name: &str,
    otlp_endpoint: &str,
    environment: &str,
) -> anyhow::Result<sdktrace::Tracer> {
    // Sample 10% of root spans in production, everything elsewhere
    let sampler = if environment == "production" {
        sdktrace::Sampler::ParentBased(Box::new(sdktrace::Sampler::TraceIdRatioBased(0.1)))
    } else {
        sdktrace::Sampler::AlwaysOn
    };

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(otlp_endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("deployment.environment", environment.to_string()),
                ]))
        )
        .install_batch(runtime::Tokio)?;

    tracing::info!(
        service = service_name,
        otlp_endpoint = otlp_endpoint,
        "OpenTelemetry tracer initialized with OTLP export"
    );

    Ok(tracer)
}
