#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use produce_orders::{
    config::{AppConfig, PaymentGatewayConfig},
    handlers::{AppServices, Collaborators},
    notifications::{MessageReceipt, MessagingClient, NotificationError},
    payments::{BillRequest, CreatedBill, GatewayClientError, PaymentGateway},
    repositories::InMemoryOrderRepository,
    webhooks::{CallbackSigner, SignatureScheme},
    AppState,
};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const GATEWAY_SECRET: &str = "sk-integration-secret";
pub const ADMIN_PHONE: &str = "+60198765432";
pub const BUYER_PHONE: &str = "+60123456789";

/// Payment gateway double that hands out `bill-1`, `bill-2`, ...
#[derive(Default)]
pub struct FakeGateway {
    issued: AtomicUsize,
    fail: AtomicBool,
    pub requests: Mutex<Vec<BillRequest>>,
}

impl FakeGateway {
    pub fn fail_next_bills(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn bills_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_bill(&self, request: BillRequest) -> Result<CreatedBill, GatewayClientError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayClientError::Rejected {
                status: 503,
                body: "gateway under maintenance".into(),
            });
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request);
        Ok(CreatedBill {
            bill_code: format!("bill-{n}"),
            payment_url: format!("https://pay.test/bill-{n}"),
        })
    }
}

/// Messaging double that records `(to, body)` pairs.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, phone: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == phone)
            .map(|(_, body)| body)
            .collect()
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagingClient for RecordingMessenger {
    async fn send_message(&self, to_e164: &str, body: &str) -> Result<MessageReceipt, NotificationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Rejected {
                status: 401,
                body: "token expired".into(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to_e164.to_string(), body.to_string()));
        Ok(MessageReceipt {
            id: format!("wamid.{}", sent.len()),
        })
    }
}

pub fn gateway_config(ack_unknown_orders: bool) -> PaymentGatewayConfig {
    PaymentGatewayConfig {
        base_url: "https://pay.test".into(),
        secret_key: GATEWAY_SECRET.into(),
        category_code: "cat-test".into(),
        return_url: "https://shop.test/checkout/return".into(),
        callback_url: "https://api.test/api/v1/payments/callback".into(),
        signature_scheme: SignatureScheme::Sha256SecretFirst,
        ack_unknown_orders,
        payment_channel: "0".into(),
        request_timeout_secs: 5,
    }
}

/// Helper harness for driving the full router over the in-memory store.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub repository: Arc<InMemoryOrderRepository>,
    pub gateway: Arc<FakeGateway>,
    pub messenger: Arc<RecordingMessenger>,
    signer: CallbackSigner,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_ack_unknown_orders(true)
    }

    pub fn with_ack_unknown_orders(ack_unknown_orders: bool) -> Self {
        let mut config = AppConfig::new(gateway_config(ack_unknown_orders));
        config.environment = "test".into();
        config.admin_base_url = "https://admin.test".into();
        config.messaging.admin_phone = Some(ADMIN_PHONE.into());

        let repository = Arc::new(InMemoryOrderRepository::new());
        let gateway = Arc::new(FakeGateway::default());
        let messenger = Arc::new(RecordingMessenger::default());

        let services = AppServices::new(
            Collaborators {
                repository: repository.clone(),
                gateway: gateway.clone(),
                messaging: messenger.clone(),
                delivery_verifier: None,
                e_invoicer: None,
            },
            &config,
        );
        let state = AppState {
            config: Arc::new(config),
            services,
        };

        Self {
            router: produce_orders::app(state.clone()),
            state,
            repository,
            gateway,
            messenger,
            signer: CallbackSigner::new(SignatureScheme::Sha256SecretFirst, GATEWAY_SECRET),
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a form-encoded gateway callback exactly as given.
    pub async fn callback(&self, fields: &[(&str, &str)]) -> Response {
        let form = fields
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/callback")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .expect("failed to build callback request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during callback")
    }

    /// Posts a correctly signed callback for `bill_code` / `order_number`.
    pub async fn signed_callback(&self, bill_code: &str, order_number: &str, status: &str) -> Response {
        let signature = self.signer.sign(bill_code, order_number, status);
        self.callback(&[
            ("billcode", bill_code),
            ("order_id", order_number),
            ("status", status),
            ("signature", signature.as_str()),
            ("transaction_id", "TP123456"),
        ])
        .await
    }

    /// Places an order through the storefront endpoint and returns the body.
    pub async fn place_order(&self, payment_method: &str, items: Value) -> (u16, Value) {
        let response = self
            .request(Method::POST, "/api/v1/orders", Some(checkout_payload(payment_method, items)))
            .await;
        let status = response.status().as_u16();
        (status, response_json(response).await)
    }

    pub async fn order(&self, order_id: &str) -> Value {
        let response = self
            .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await;
        assert_eq!(response.status(), 200, "order {order_id} should exist");
        response_json(response).await["data"].clone()
    }
}

pub fn scenario_items() -> Value {
    json!([
        { "productId": "p1", "name": "Holy basil", "unit": "kg", "quantity": 5, "unitPrice": "5.50", "taxable": false },
        { "productId": "p2", "name": "Bird's eye chili", "unit": "kg", "quantity": 3, "unitPrice": "7.20", "taxable": true }
    ])
}

pub fn checkout_payload(payment_method: &str, items: Value) -> Value {
    json!({
        "lineItems": items,
        "buyer": {
            "userId": "buyer-1",
            "businessName": "Kedai Kopi Lim",
            "contactName": "Lim Ah Kow",
            "phone": "012-345 6789",
            "email": "lim@example.com",
            "address": "12 Jalan Sultan, Kuala Lumpur"
        },
        "deliveryDate": "2024-07-08",
        "deliveryTimeSlot": "08:00-10:00",
        "paymentMethod": payment_method,
        "language": "en"
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn response_text(response: Response) -> String {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf-8 response")
}

/// Reads a serialized `Decimal` (string or number) back for comparison.
pub fn decimal(value: &Value) -> rust_decimal::Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal, got {other}"),
    }
}

/// Order number the app will hand out for `sequence` today.
pub fn today_order_number(app: &TestApp, sequence: u64) -> String {
    let offset = app.state.config.business_offset();
    produce_orders::services::order_numbers::OrderNumberGenerator::format(
        sequence,
        chrono::Utc::now().with_timezone(&offset).date_naive(),
    )
}
