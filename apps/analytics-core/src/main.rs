//! Analytics Core - service entry point
//! Wires configuration, observability, the breaker registry and the upstream client

use analytics_core::config::Config;
use analytics_core::observability::{self, health::{start_health_server, HealthState}};
use analytics_core::{ResilienceRegistry, UpstreamClient};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    observability::init_observability("analytics-core", &config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.upstream_url,
        "Starting Analytics Core..."
    );

    let registry = Arc::new(ResilienceRegistry::new(
        config.retry_policy.clone(),
        config.breaker.clone(),
    ));

    let caller = registry.caller(&config.upstream_label).await;
    let upstream = UpstreamClient::new(config.upstream_url.clone(), caller)?;

    let ready = Arc::new(AtomicBool::new(false));
    let health_state = HealthState {
        registry: registry.clone(),
        ready: ready.clone(),
    };

    let metrics_port = config.metrics_port;
    let server = tokio::spawn(async move {
        if let Err(e) = start_health_server(metrics_port, health_state).await {
            error!(error = %e, "Health server failed");
        }
    });
    ready.store(true, Ordering::Relaxed);

    // Startup probe runs once the health server is up; an unreachable upstream
    // is reported but does not stop the service
    let probe_label = config.upstream_label.clone();
    let probe_path = config.upstream_health_path.clone();
    tokio::spawn(async move {
        match upstream.get_json(&probe_path).await {
            Ok(_) => info!(label = %probe_label, "Upstream reachable"),
            Err(e) => warn!(
                label = %probe_label,
                attempts = e.attempts(),
                error = %e,
                "Upstream probe failed"
            ),
        }
    });

    tokio::select! {
        _ = server => {
            error!("Health server exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    observability::shutdown_observability();
    info!("Analytics Core stopped");
    Ok(())
}
