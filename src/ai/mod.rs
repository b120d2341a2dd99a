//! Clients for the hosted AI flows used after fulfilment.
//!
//! Each flow is exposed over HTTP as `POST {base}/{flowName}` taking
//! `{"data": input}` and answering `{"result": output}`.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::errors::ServiceError;

#[derive(Debug, Error)]
pub enum AiFlowError {
    #[error("AI flow transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("AI flow {flow} failed ({status}): {body}")]
    Rejected {
        flow: &'static str,
        status: u16,
        body: String,
    },
    #[error("AI flow {flow} returned an invalid result: {reason}")]
    InvalidResult { flow: &'static str, reason: String },
}

impl From<AiFlowError> for ServiceError {
    fn from(err: AiFlowError) -> Self {
        match err {
            AiFlowError::Transport(e) if e.is_timeout() => ServiceError::Timeout(e.to_string()),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAssessment {
    pub is_completed: bool,
    pub confidence: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EInvoiceLine {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub taxable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EInvoiceRequest {
    pub order_number: String,
    pub issue_date: NaiveDate,
    pub buyer_name: String,
    pub buyer_address: String,
    pub buyer_email: Option<String>,
    pub lines: Vec<EInvoiceLine>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub currency: &'static str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EInvoiceDocument {
    pub invoice_number: String,
    pub status: String,
    #[serde(default)]
    pub validation_url: Option<String>,
}

#[async_trait]
pub trait DeliveryVerifier: Send + Sync {
    async fn verify_delivery(
        &self,
        photo_data_uri: &str,
        order_id: &str,
    ) -> Result<DeliveryAssessment, AiFlowError>;
}

#[async_trait]
pub trait EInvoiceGenerator: Send + Sync {
    async fn generate_e_invoice(
        &self,
        request: &EInvoiceRequest,
    ) -> Result<EInvoiceDocument, AiFlowError>;
}

#[derive(Clone)]
pub struct HttpFlowClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct FlowEnvelope<T> {
    result: T,
}

impl HttpFlowClient {
    /// Timeouts are applied per call by the caller; the client itself does not
    /// impose one.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AiFlowError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn run<I, O>(&self, flow: &'static str, input: &I) -> Result<O, AiFlowError>
    where
        I: Serialize + Sync,
        O: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", self.base_url, flow);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "data": input }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AiFlowError::Rejected {
                flow,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let bytes = response.bytes().await?;
        let envelope: FlowEnvelope<O> =
            serde_json::from_slice(&bytes).map_err(|e| AiFlowError::InvalidResult {
                flow,
                reason: e.to_string(),
            })?;
        debug!(flow, "AI flow completed");
        Ok(envelope.result)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyDeliveryInput<'a> {
    photo_data_uri: &'a str,
    order_id: &'a str,
}

#[async_trait]
impl DeliveryVerifier for HttpFlowClient {
    async fn verify_delivery(
        &self,
        photo_data_uri: &str,
        order_id: &str,
    ) -> Result<DeliveryAssessment, AiFlowError> {
        self.run(
            "verifyDelivery",
            &VerifyDeliveryInput {
                photo_data_uri,
                order_id,
            },
        )
        .await
    }
}

#[async_trait]
impl EInvoiceGenerator for HttpFlowClient {
    async fn generate_e_invoice(
        &self,
        request: &EInvoiceRequest,
    ) -> Result<EInvoiceDocument, AiFlowError> {
        self.run("generateEInvoice", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn verify_delivery_wraps_input_and_unwraps_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verifyDelivery"))
            .and(body_partial_json(json!({
                "data": { "photoDataUri": "data:image/jpeg;base64,AAAA", "orderId": "PA0001070724" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "isCompleted": true, "confidence": 0.92, "notes": "Crates at the back door" }
            })))
            .mount(&server)
            .await;

        let client = HttpFlowClient::new(server.uri()).unwrap();
        let assessment = client
            .verify_delivery("data:image/jpeg;base64,AAAA", "PA0001070724")
            .await
            .unwrap();
        assert!(assessment.is_completed);
        assert_eq!(assessment.notes.as_deref(), Some("Crates at the back door"));
    }

    #[tokio::test]
    async fn malformed_results_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": { "foo": 1 } })))
            .mount(&server)
            .await;

        let client = HttpFlowClient::new(server.uri()).unwrap();
        let err = client.verify_delivery("x", "y").await.unwrap_err();
        assert!(matches!(err, AiFlowError::InvalidResult { flow: "verifyDelivery", .. }));
        assert!(matches!(
            ServiceError::from(err),
            ServiceError::ExternalServiceError(_)
        ));
    }
}
