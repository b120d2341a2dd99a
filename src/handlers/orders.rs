use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::handlers::common::{no_content_response, page_bounds, parse_order_id};
use crate::models::{NewLineItem, Order, OrderStatus};
use crate::services::order_lifecycle::PlaceOrderRequest;
use crate::{errors::ServiceError, ApiResponse, AppState, ListQuery, PaginatedResponse};

/// Checkout result shown to the storefront, success or not.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetAmendableRequest {
    pub is_amendable: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AmendOrderRequest {
    pub line_items: Vec<NewLineItem>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AmendmentResponse {
    pub order: Order,
    pub added: usize,
    pub updated: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPhotoRequest {
    #[validate(length(min = 1, message = "photoDataUri is required"))]
    pub photo_data_uri: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Place order",
    description = "Checkout from the storefront. With `originalOrderId` the items are merged into that order instead.",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = PlaceOrderResponse,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid cart or buyer details", body = PlaceOrderResponse),
        (status = 409, description = "Order can no longer be amended", body = PlaceOrderResponse),
        (status = 502, description = "Payment gateway failed", body = PlaceOrderResponse),
    ),
    tag = "Orders"
)]
pub async fn place_order(
    State(state): State<AppState>,
    Json(payload): Json<PlaceOrderRequest>,
) -> Response {
    match state.services.orders.place_order(payload).await {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(PlaceOrderResponse {
                success: true,
                message: outcome.message,
                order_id: Some(outcome.order.id),
                order_number: Some(outcome.order.order_number),
                redirect_url: outcome.redirect_url,
                warnings: outcome.warnings,
            }),
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "checkout failed");
            (
                err.status_code(),
                Json(PlaceOrderResponse {
                    success: false,
                    message: err.response_message(),
                    order_id: None,
                    order_number: None,
                    redirect_url: None,
                    warnings: Vec::new(),
                }),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Newest orders first",
    params(ListQuery),
    responses(
        (status = 200, description = "Orders retrieved successfully", body = ApiResponse<PaginatedResponse<Order>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<Order>>>, ServiceError> {
    let (page, limit) = page_bounds(&query, &state.config);
    let (orders, total) = state.services.orders.list(page, limit).await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders, page, limit, total,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = String, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<Order>),
        (status = 400, description = "Malformed order id", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.services.orders.get(parse_order_id(&id)?).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    summary = "Get order by number",
    description = "Retrieve an order by its public order number (e.g., PA0001070724)",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<Order>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state.services.orders.get_by_number(&order_number).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    params(("id" = String, Path, description = "Order ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<Order>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is completed or cancelled", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_status(parse_order_id(&id)?, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/amendable",
    summary = "Open or close the amendment window",
    params(("id" = String, Path, description = "Order ID")),
    request_body = SetAmendableRequest,
    responses(
        (status = 200, description = "Flag updated", body = ApiResponse<Order>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn set_order_amendable(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SetAmendableRequest>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state
        .services
        .orders
        .set_amendable(parse_order_id(&id)?, payload.is_amendable)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/amendments",
    summary = "Add items to an order",
    params(("id" = String, Path, description = "Order ID")),
    request_body = AmendOrderRequest,
    responses(
        (status = 200, description = "Items merged", body = ApiResponse<AmendmentResponse>),
        (status = 400, description = "Invalid items", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not amendable", body = crate::errors::ErrorResponse),
        (status = 502, description = "Amended but the new bill could not be created", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn amend_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<AmendOrderRequest>,
) -> Result<Json<ApiResponse<AmendmentResponse>>, ServiceError> {
    let outcome = state
        .services
        .amendments
        .amend(parse_order_id(&id)?, payload.line_items)
        .await?;
    Ok(Json(ApiResponse::success(AmendmentResponse {
        added: outcome.summary.added,
        updated: outcome.summary.updated,
        order: outcome.order,
        warnings: outcome.warnings,
    })))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment",
    summary = "Retry payment",
    description = "Issue a fresh bill for the amount still owed",
    params(("id" = String, Path, description = "Order ID")),
    responses(
        (status = 200, description = "New bill issued", body = ApiResponse<Order>),
        (status = 400, description = "Order is paid or not an online order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is completed or cancelled", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failed", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state
        .services
        .orders
        .retry_payment(parse_order_id(&id)?)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/delivery-verification",
    summary = "Verify delivery photo",
    params(("id" = String, Path, description = "Order ID")),
    request_body = DeliveryPhotoRequest,
    responses(
        (status = 200, description = "Assessment recorded", body = ApiResponse<Order>),
        (status = 400, description = "Missing or malformed photo", body = crate::errors::ErrorResponse),
        (status = 502, description = "Verification flow failed", body = crate::errors::ErrorResponse),
        (status = 503, description = "Verification not configured", body = crate::errors::ErrorResponse),
        (status = 504, description = "Verification timed out", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn verify_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<DeliveryPhotoRequest>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    payload.validate()?;
    let order = state
        .services
        .fulfillment
        .verify_delivery(parse_order_id(&id)?, &payload.photo_data_uri)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/e-invoice",
    summary = "Generate e-invoice",
    params(("id" = String, Path, description = "Order ID")),
    responses(
        (status = 200, description = "E-invoice recorded", body = ApiResponse<Order>),
        (status = 502, description = "E-invoice flow failed", body = crate::errors::ErrorResponse),
        (status = 503, description = "E-invoicing not configured", body = crate::errors::ErrorResponse),
        (status = 504, description = "E-invoice flow timed out", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn generate_e_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state
        .services
        .fulfillment
        .generate_e_invoice(parse_order_id(&id)?)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    summary = "Delete order",
    params(("id" = String, Path, description = "Order ID")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .orders
        .delete_order(parse_order_id(&id)?)
        .await?;
    Ok(no_content_response())
}
