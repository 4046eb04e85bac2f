//! Health Check & Metrics HTTP Server
//! Provides /health, /health/live, /health/ready, /metrics and breaker administration

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use super::metrics::encode_metrics;
use crate::resilience::{BreakerMetrics, CircuitState, ResilienceRegistry};

#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<ResilienceRegistry>,
    pub ready: Arc<AtomicBool>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    breakers: Vec<BreakerMetrics>,
}

static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/breakers", get(list_breakers))
        .route("/breakers/:label/reset", post(reset_breaker))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the health check and metrics HTTP server
#[instrument(skip(state))]
pub async fn start_health_server(port: u16, state: HealthState) -> anyhow::Result<()> {
    START_TIME.get_or_init(std::time::Instant::now);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(port = port, "Health/metrics server started");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[instrument(skip(state))]
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let breakers = state.registry.snapshots().await;
    let healthy = breakers.iter().all(|b| b.state != CircuitState::Open);
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    let response = HealthResponse {
        status: if healthy { "healthy".to_string() } else { "degraded".to_string() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        breakers,
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "reason": "initializing" })),
        )
    }
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}

async fn list_breakers(State(state): State<HealthState>) -> impl IntoResponse {
    Json(state.registry.snapshots().await)
}

#[instrument(skip(state))]
async fn reset_breaker(
    State(state): State<HealthState>,
    Path(label): Path<String>,
) -> impl IntoResponse {
    if state.registry.reset(&label).await {
        info!(label = %label, "Breaker reset via admin endpoint");
        (StatusCode::OK, Json(serde_json::json!({ "label": label, "state": "closed" })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no breaker registered for '{}'", label) })),
        )
    }
}
