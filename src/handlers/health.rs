use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::handlers::AppState;

/// Component health status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: ComponentStatus,
    pub storage: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Liveness: answers as long as the process is serving requests.
async fn liveness_check() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": get_uptime_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Readiness: the order store must answer a count.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let result = state.services.repository.count().await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: ComponentStatus::Up,
                storage: ComponentStatus::Up,
                message: None,
                latency_ms,
            }),
        ),
        Err(err) => {
            error!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: ComponentStatus::Down,
                    storage: ComponentStatus::Down,
                    message: Some(err.response_message()),
                    latency_ms,
                }),
            )
        }
    }
}

/// Prometheus text exposition of the crate registry.
pub async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                String::from("metrics error"),
            )
        }
    }
}

/// Creates the router for health check endpoints
///
/// Endpoints:
/// - GET /health         - Liveness probe
/// - GET /health/ready   - Readiness probe (checks the order store)
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(liveness_check))
        .route("/ready", get(readiness_check))
}
