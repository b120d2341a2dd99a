//! Produce ordering backend
//!
//! Order lifecycle, FPX payment reconciliation, amendments and buyer/admin
//! notifications for a B2B produce supplier.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod ai;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod notifications;
pub mod openapi;
pub mod payments;
pub mod repositories;
pub mod services;
pub mod tracing;
pub mod webhooks;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::{IntoParams, ToSchema};

use crate::config::AppConfig;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: handlers::AppServices,
}

// Common query parameters for list endpoints
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Page number, starting at 1
    pub page: Option<u64>,
    /// Items per page (default 20, max 100)
    pub limit: Option<u64>,
}

// Common response wrappers
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(!response.success);
    }
}

/// `/api/v1` routes: storefront checkout, order administration and the
/// gateway callback.
pub fn api_v1_routes() -> Router<AppState> {
    use handlers::{orders, payment_webhooks};

    let order_routes = Router::new()
        .route("/orders", get(orders::list_orders).post(orders::place_order))
        .route(
            "/orders/by-number/:order_number",
            get(orders::get_order_by_number),
        )
        .route(
            "/orders/:id",
            get(orders::get_order).delete(orders::delete_order),
        )
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/orders/:id/amendable", put(orders::set_order_amendable))
        .route("/orders/:id/amendments", post(orders::amend_order))
        .route("/orders/:id/payment", post(orders::retry_payment))
        .route(
            "/orders/:id/delivery-verification",
            post(orders::verify_delivery),
        )
        .route("/orders/:id/e-invoice", post(orders::generate_e_invoice));

    let payment_routes = Router::new().route(
        "/payments/callback",
        post(payment_webhooks::payment_callback),
    );

    order_routes.merge(payment_routes)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect();

    if origins.is_empty() {
        ::tracing::info!("no CORS origins configured; using permissive CORS");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// The complete HTTP application: API, health, metrics and Swagger UI behind
/// request-id, tracing, CORS and timeout layers.
pub fn app(state: AppState) -> Router {
    let config = state.config.clone();

    Router::<AppState>::new()
        .route("/", get(|| async { "produce-orders up" }))
        .route("/metrics", get(handlers::health::metrics_handler))
        .nest("/health", handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .fallback(|| async {
            (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<()>::error("Route not found".into())),
            )
        })
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
