//! Outbound bill creation with the FPX bill-payment provider.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::PaymentGatewayConfig;
use crate::errors::ServiceError;

const BILL_NAME_MAX: usize = 30;
const BILL_DESCRIPTION_MAX: usize = 100;

#[derive(Debug, Error)]
pub enum GatewayClientError {
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected bill ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected gateway response: {0}")]
    UnexpectedResponse(String),
}

impl From<GatewayClientError> for ServiceError {
    fn from(err: GatewayClientError) -> Self {
        ServiceError::GatewayError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRequest {
    /// Also sent as the external reference echoed back in callbacks.
    pub order_number: String,
    pub description: String,
    pub amount_cents: i64,
    pub payer_name: String,
    pub payer_email: Option<String>,
    pub payer_phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBill {
    pub bill_code: String,
    pub payment_url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_bill(&self, request: BillRequest) -> Result<CreatedBill, GatewayClientError>;
}

/// Form-encoded `createBill` client.
#[derive(Clone)]
pub struct HttpBillGateway {
    http: reqwest::Client,
    config: PaymentGatewayConfig,
}

impl HttpBillGateway {
    pub fn new(config: PaymentGatewayConfig) -> Result<Self, GatewayClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn form(&self, request: &BillRequest) -> Vec<(&'static str, String)> {
        vec![
            ("userSecretKey", self.config.secret_key.clone()),
            ("categoryCode", self.config.category_code.clone()),
            ("billName", truncate(&format!("Order {}", request.order_number), BILL_NAME_MAX)),
            ("billDescription", truncate(&request.description, BILL_DESCRIPTION_MAX)),
            ("billPriceSetting", "1".to_string()),
            ("billPayorInfo", "1".to_string()),
            ("billAmount", request.amount_cents.to_string()),
            ("billReturnUrl", self.config.return_url.clone()),
            ("billCallbackUrl", self.config.callback_url.clone()),
            ("billExternalReferenceNo", request.order_number.clone()),
            ("billTo", request.payer_name.clone()),
            ("billEmail", request.payer_email.clone().unwrap_or_default()),
            ("billPhone", request.payer_phone.clone()),
            ("billPaymentChannel", self.config.payment_channel.clone()),
        ]
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Extracts `BillCode` from `[{"BillCode": "..."}]`.
fn parse_bill_code(body: &str) -> Result<String, GatewayClientError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|_| GatewayClientError::UnexpectedResponse(body.chars().take(200).collect()))?;
    let first = match &value {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    first
        .and_then(|entry| entry.get("BillCode"))
        .and_then(Value::as_str)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            let message = first
                .and_then(|entry| entry.get("msg"))
                .and_then(Value::as_str)
                .unwrap_or(body);
            GatewayClientError::UnexpectedResponse(message.chars().take(200).collect())
        })
}

#[async_trait]
impl PaymentGateway for HttpBillGateway {
    #[instrument(skip(self, request), fields(order_number = %request.order_number, amount_cents = request.amount_cents))]
    async fn create_bill(&self, request: BillRequest) -> Result<CreatedBill, GatewayClientError> {
        let url = format!("{}/index.php/api/createBill", self.base_url());
        let response = self.http.post(&url).form(&self.form(&request)).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let bill_code = parse_bill_code(&body)?;
        debug!(bill_code = %bill_code, "bill created");
        Ok(CreatedBill {
            payment_url: format!("{}/{}", self.base_url(), bill_code),
            bill_code,
        })
    }
}
