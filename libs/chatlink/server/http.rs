//! Monitoring and configuration endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::classify::ErrorStats;
use crate::server::config::GatewayConfig;
use crate::server::gateway::{self, InboundHandler};
use crate::server::monitor::{HealthMonitor, HealthStatus};
use crate::server::registry::ConnectionRegistry;

/// Shared handles behind every route.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub monitor: Arc<HealthMonitor>,
    pub errors: Arc<ErrorStats>,
    pub config: Arc<GatewayConfig>,
    pub handler: Arc<dyn InboundHandler>,
}

/// Full gateway router: the websocket endpoint plus the monitoring
/// surface, with request tracing and permissive CORS for ops tooling.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(gateway::ws_upgrade))
        .merge(monitoring_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The monitoring routes on their own, for tests and embedding.
pub fn monitoring_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/metrics/summary", get(metrics_summary))
        .route("/metrics/reset", post(metrics_reset))
        .route("/errors", get(errors))
        .route("/errors/reset", post(errors_reset))
        .route("/status", get(status))
        .route("/config", get(config_view))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.monitor.health();
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.metrics())
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    /// Window in milliseconds; defaults to one hour.
    window: Option<u64>,
}

async fn metrics_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> impl IntoResponse {
    let window = Duration::from_millis(params.window.unwrap_or(3_600_000));
    Json(state.monitor.performance_summary(window))
}

async fn metrics_reset(State(state): State<AppState>) -> impl IntoResponse {
    state.monitor.reset();
    info!("metrics reset via http");
    Json(json!({ "reset": true }))
}

async fn errors(State(state): State<AppState>) -> impl IntoResponse {
    let by_kind: HashMap<&'static str, _> = state.errors.snapshot();
    Json(json!({
        "total": state.errors.total(),
        "byKind": by_kind,
    }))
}

async fn errors_reset(State(state): State<AppState>) -> impl IntoResponse {
    state.errors.reset();
    info!("error counters reset via http");
    Json(json!({ "reset": true }))
}

/// Combined operational view: health, metrics, error counters, and
/// registry aggregates in one response.
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.monitor.health();
    let metrics = state.monitor.metrics();
    let stats = state.registry.stats();
    Json(json!({
        "health": health,
        "metrics": metrics,
        "connections": stats,
        "errors": {
            "total": state.errors.total(),
            "byKind": state.errors.snapshot(),
        },
    }))
}

async fn config_view(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.sanitized())
}
