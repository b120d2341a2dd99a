use std::collections::BTreeMap;

use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use crate::webhooks::{redacted_payload, GatewayCallback};
use crate::AppState;

// POST /api/v1/payments/callback
#[utoipa::path(
    post,
    path = "/api/v1/payments/callback",
    summary = "Payment gateway callback",
    description = "Form-encoded server-to-server notification carrying `billcode`, `status`, `order_id` and `signature`.",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Callback processed", body = String),
        (status = 400, description = "Missing fields or bad signature", body = String),
        (status = 404, description = "Unknown order (only when unknown orders are not acknowledged)", body = String),
        (status = 500, description = "Processing failed; the gateway should retry", body = String)
    ),
    tag = "Payments"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Response {
    let callback = match GatewayCallback::from_form(fields.clone()) {
        Ok(callback) => callback,
        Err(err) => {
            warn!(error = %err, payload = %redacted_payload(&fields), "malformed payment callback");
            return (StatusCode::BAD_REQUEST, err.response_message()).into_response();
        }
    };

    match state.services.reconciler.handle(&callback).await {
        Ok(result) => {
            info!(
                bill_code = %callback.bill_code,
                order_number = %callback.order_number,
                outcome = result.outcome.as_ref(),
                "payment callback acknowledged"
            );
            (StatusCode::OK, "OK").into_response()
        }
        Err(err) => {
            let status = if err.is_retryable() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                err.status_code()
            };
            error!(
                bill_code = %callback.bill_code,
                order_number = %callback.order_number,
                payload = %callback.loggable_payload(),
                error = %err,
                status = status.as_u16(),
                "payment callback failed"
            );
            (status, err.response_message()).into_response()
        }
    }
}
