//! Adding items to an open order, through the admin endpoint and through
//! checkout with `originalOrderId`.

mod common;

use axum::http::Method;
use common::{checkout_payload, decimal, response_json, TestApp, ADMIN_PHONE, BUYER_PHONE};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

fn basil(quantity: u32, unit_price: &str) -> Value {
    json!({
        "productId": "p1",
        "name": "Holy basil",
        "unit": "kg",
        "quantity": quantity,
        "unitPrice": unit_price,
        "taxable": false
    })
}

fn chili(quantity: u32) -> Value {
    json!({
        "productId": "p2",
        "name": "Bird's eye chili",
        "unit": "kg",
        "quantity": quantity,
        "unitPrice": "7.20",
        "taxable": true
    })
}

async fn amend(app: &TestApp, id: &str, items: Value) -> (u16, Value) {
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{id}/amendments"),
            Some(json!({ "lineItems": items })),
        )
        .await;
    let status = response.status().as_u16();
    (status, response_json(response).await)
}

#[tokio::test]
async fn matching_item_is_merged_and_marked_updated() {
    let app = TestApp::new();
    let (_, body) = app
        .place_order("cash_on_delivery", json!([basil(3, "5.50")]))
        .await;
    let id = body["orderId"].as_str().unwrap().to_string();

    let (status, body) = amend(&app, &id, json!([basil(2, "5.50")])).await;
    assert_eq!(status, 200, "unexpected body: {body}");

    let data = &body["data"];
    assert_eq!(data["added"], 0);
    assert_eq!(data["updated"], 1);
    let items = data["order"]["lineItems"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 5);
    assert_eq!(items[0]["provenance"], "updated");
    assert_eq!(decimal(&data["order"]["total"]), dec!(27.50));
    assert_eq!(data["order"]["isAmendable"], false);

    // creation + amendment, each to buyer and admin
    assert_eq!(app.messenger.sent_to(BUYER_PHONE).len(), 2);
    assert_eq!(app.messenger.sent_to(ADMIN_PHONE).len(), 2);
}

#[tokio::test]
async fn new_product_is_appended_as_added() {
    let app = TestApp::new();
    let (_, body) = app
        .place_order("cash_on_delivery", json!([basil(3, "5.50")]))
        .await;
    let id = body["orderId"].as_str().unwrap().to_string();

    let (status, body) = amend(&app, &id, json!([chili(3)])).await;
    assert_eq!(status, 200);

    let order = &body["data"]["order"];
    let items = order["lineItems"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["provenance"], "original");
    assert_eq!(items[1]["provenance"], "added");
    assert_eq!(decimal(&order["subtotal"]), dec!(38.10));
    assert_eq!(decimal(&order["taxAmount"]), dec!(1.296));
}

#[tokio::test]
async fn amending_keeps_the_original_unit_price() {
    let app = TestApp::new();
    let (_, body) = app
        .place_order("cash_on_delivery", json!([basil(3, "5.50")]))
        .await;
    let id = body["orderId"].as_str().unwrap().to_string();

    let (_, body) = amend(&app, &id, json!([basil(1, "9.90")])).await;

    let item = &body["data"]["order"]["lineItems"][0];
    assert_eq!(decimal(&item["unitPrice"]), dec!(5.50));
    assert_eq!(item["quantity"], 4);
}

#[tokio::test]
async fn second_amendment_is_refused() {
    let app = TestApp::new();
    let (_, body) = app
        .place_order("cash_on_delivery", json!([basil(3, "5.50")]))
        .await;
    let id = body["orderId"].as_str().unwrap().to_string();

    let (status, _) = amend(&app, &id, json!([chili(1)])).await;
    assert_eq!(status, 200);
    let (status, _) = amend(&app, &id, json!([chili(1)])).await;
    assert_eq!(status, 409);

    let order = app.order(&id).await;
    assert_eq!(order["lineItems"][1]["quantity"], 1);
}

#[tokio::test]
async fn delivered_order_cannot_be_amended() {
    let app = TestApp::new();
    let (_, body) = app
        .place_order("cash_on_delivery", json!([basil(3, "5.50")]))
        .await;
    let id = body["orderId"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{id}/status"),
            Some(json!({ "status": "delivered" })),
        )
        .await;
    assert_eq!(response.status(), 200);

    let (status, _) = amend(&app, &id, json!([chili(1)])).await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn checkout_with_original_order_id_merges_into_that_order() {
    let app = TestApp::new();
    let (_, body) = app
        .place_order("cash_on_delivery", json!([basil(3, "5.50")]))
        .await;
    let id = body["orderId"].as_str().unwrap().to_string();
    let number = body["orderNumber"].as_str().unwrap().to_string();

    let mut payload = checkout_payload("cash_on_delivery", json!([basil(2, "5.50")]));
    payload["originalOrderId"] = json!(id);
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(response.status(), 201);
    let body = response_json(response).await;
    assert_eq!(body["orderNumber"], number);

    let listing = response_json(app.request(Method::GET, "/api/v1/orders", None).await).await;
    assert_eq!(listing["data"]["total"], 1);
    assert_eq!(app.order(&id).await["lineItems"][0]["quantity"], 5);
}

#[tokio::test]
async fn paid_online_order_is_billed_for_the_difference() {
    let app = TestApp::new();
    let (_, body) = app
        .place_order("online_banking", json!([basil(3, "5.50")]))
        .await;
    let id = body["orderId"].as_str().unwrap().to_string();
    let number = body["orderNumber"].as_str().unwrap().to_string();
    app.signed_callback("bill-1", &number, "1").await;

    let (status, body) = amend(&app, &id, json!([chili(3)])).await;
    assert_eq!(status, 200, "unexpected body: {body}");
    let order = &body["data"]["order"];
    assert_eq!(order["paymentStatus"], "awaiting_payment");
    assert_eq!(order["status"], "processing");
    assert_eq!(order["gatewayBillReference"], "bill-2");
    assert_eq!(decimal(&order["gatewayBillAmount"]), dec!(22.90));

    app.signed_callback("bill-2", &number, "1").await;
    let order = app.order(&id).await;
    assert_eq!(order["paymentStatus"], "paid");
    assert_eq!(order["status"], "processing");
    assert_eq!(decimal(&order["amountPaid"]), dec!(39.40));
}

#[tokio::test]
async fn oversized_price_is_rejected_without_touching_the_order() {
    let app = TestApp::new();
    let (_, body) = app
        .place_order("cash_on_delivery", json!([basil(3, "5.50")]))
        .await;
    let id = body["orderId"].as_str().unwrap().to_string();

    let (status, _) = amend(&app, &id, json!([basil(2, "79228162514264337593543950335")])).await;
    assert_eq!(status, 400);

    let order = app.order(&id).await;
    assert_eq!(order["isAmendable"], true);
    assert_eq!(order["lineItems"][0]["quantity"], 3);
}
