use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Produce Orders API",
        version = "1.0.0",
        description = r#"
# Produce Orders API

Ordering backend for restaurant and cafe buyers of a produce supplier.

## Features

- **Checkout**: Cash-on-delivery and FPX online-banking orders
- **Order Administration**: Status updates, amendment window, payment retries
- **Amendments**: Add items to an open order; matching lines are merged
- **Payment Callbacks**: Signed, idempotent reconciliation of gateway notifications
- **Fulfilment**: Delivery-photo verification and e-invoice generation

## Error Handling

Errors share one envelope:

```json
{
  "error": "Conflict",
  "message": "Invalid transition: order PA0001070724 is completed and cannot move to processing",
  "request_id": "3f2c...",
  "timestamp": "2024-07-07T00:00:00Z"
}
```

## Pagination

`GET /api/v1/orders` accepts `page` (default 1) and `limit` (default 20, max 100).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Checkout and order administration"),
        (name = "Payments", description = "Payment gateway callbacks")
    ),
    paths(
        // Orders
        crate::handlers::orders::place_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::set_order_amendable,
        crate::handlers::orders::amend_order,
        crate::handlers::orders::retry_payment,
        crate::handlers::orders::verify_delivery,
        crate::handlers::orders::generate_e_invoice,
        crate::handlers::orders::delete_order,

        // Webhooks
        crate::handlers::payment_webhooks::payment_callback,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Order types
            crate::models::Order,
            crate::models::LineItem,
            crate::models::NewLineItem,
            crate::models::BuyerSnapshot,
            crate::models::OrderStatus,
            crate::models::PaymentMethod,
            crate::models::PaymentStatus,
            crate::models::ItemProvenance,
            crate::models::Language,
            crate::models::StatusHistoryEntry,
            crate::models::DeliveryVerification,
            crate::models::EInvoice,
            crate::services::order_lifecycle::PlaceOrderRequest,
            crate::handlers::orders::PlaceOrderResponse,
            crate::handlers::orders::UpdateStatusRequest,
            crate::handlers::orders::SetAmendableRequest,
            crate::handlers::orders::AmendOrderRequest,
            crate::handlers::orders::AmendmentResponse,
            crate::handlers::orders::DeliveryPhotoRequest,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_order_and_callback_paths() {
        let json = serde_json::to_string_pretty(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Produce Orders API"));
        assert!(json.contains("/api/v1/orders/{id}/amendments"));
        assert!(json.contains("/api/v1/payments/callback"));
    }
}
