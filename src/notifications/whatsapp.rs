use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{MessageReceipt, MessagingClient, NotificationError};

/// WhatsApp Cloud API text-message client.
#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_base_url: String,
    phone_number_id: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

impl WhatsAppClient {
    pub fn new(
        api_base_url: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
        })
    }
}

#[async_trait]
impl MessagingClient for WhatsAppClient {
    async fn send_message(
        &self,
        to_e164: &str,
        body: &str,
    ) -> Result<MessageReceipt, NotificationError> {
        let url = format!("{}/{}/messages", self.api_base_url, self.phone_number_id);
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to_e164.trim_start_matches('+'),
            "type": "text",
            "text": { "preview_url": false, "body": body },
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendResponse = response.json().await?;
        let id = parsed
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| NotificationError::UnexpectedResponse("no message id returned".into()))?;
        debug!(message_id = %id, "whatsapp message accepted");
        Ok(MessageReceipt { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> WhatsAppClient {
        WhatsAppClient::new(server.uri(), "10987", "tok-123", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn posts_text_message_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/10987/messages"))
            .and(header("authorization", "Bearer tok-123"))
            .and(body_partial_json(json!({
                "to": "60123456789",
                "type": "text",
                "text": { "body": "hello" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messaging_product": "whatsapp",
                "contacts": [{ "input": "60123456789", "wa_id": "60123456789" }],
                "messages": [{ "id": "wamid.HBgL" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client(&server)
            .await
            .send_message("+60123456789", "hello")
            .await
            .unwrap();
        assert_eq!(receipt.id, "wamid.HBgL");
    }

    #[tokio::test]
    async fn api_errors_are_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired token"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .send_message("+60123456789", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Rejected { status: 401, ref body } if body == "expired token"));
    }
}
