//! Buyer and admin messages for order events.
//!
//! Delivery is best effort: [`NotificationDispatcher::notify`] never fails.
//! Problems are logged, counted, and handed back as soft warnings for the
//! caller to surface.

use std::sync::Arc;

use async_trait::async_trait;
use strum::AsRefStr;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::MessagingConfig;
use crate::metrics::NOTIFICATION_FAILURES;
use crate::models::Order;

pub mod messages;
pub mod phone;
pub mod whatsapp;

pub use whatsapp::WhatsAppClient;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Messaging transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Messaging API rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Unexpected messaging API response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReceipt {
    pub id: String,
}

/// Outbound text-message delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Sends `body` to an E.164 number (`+60123456789`).
    async fn send_message(&self, to_e164: &str, body: &str)
        -> Result<MessageReceipt, NotificationError>;
}

/// Stand-in used when messaging is disabled; messages only reach the log.
#[derive(Debug, Default, Clone)]
pub struct LogOnlyMessagingClient;

#[async_trait]
impl MessagingClient for LogOnlyMessagingClient {
    async fn send_message(
        &self,
        to_e164: &str,
        body: &str,
    ) -> Result<MessageReceipt, NotificationError> {
        info!(to = to_e164, chars = body.chars().count(), "messaging disabled; not sending");
        Ok(MessageReceipt {
            id: format!("log-{}", uuid::Uuid::new_v4()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    Created,
    Amended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Audience {
    Buyer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { message_id: String },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationReport {
    pub buyer: Delivery,
    pub admin: Delivery,
}

impl NotificationReport {
    pub fn warnings(&self) -> Vec<String> {
        [(Audience::Buyer, &self.buyer), (Audience::Admin, &self.admin)]
            .into_iter()
            .filter_map(|(audience, delivery)| match delivery {
                Delivery::Failed { reason } => Some(format!(
                    "{} notification could not be sent: {}",
                    audience.as_ref(),
                    reason
                )),
                _ => None,
            })
            .collect()
    }

    pub fn all_sent(&self) -> bool {
        matches!(self.buyer, Delivery::Sent { .. }) && matches!(self.admin, Delivery::Sent { .. })
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    client: Arc<dyn MessagingClient>,
    admin_phone: Option<String>,
    default_country_code: String,
    admin_base_url: String,
}

impl NotificationDispatcher {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        messaging: &MessagingConfig,
        admin_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            admin_phone: messaging.admin_phone.clone(),
            default_country_code: messaging.default_country_code.clone(),
            admin_base_url: admin_base_url.into(),
        }
    }

    #[instrument(skip(self, order), fields(order_id = %order.id, order_number = %order.order_number, kind = kind.as_ref()))]
    pub async fn notify(&self, order: &Order, kind: NotificationKind) -> NotificationReport {
        let buyer_body = messages::buyer_message(order, kind);
        let admin_body = messages::admin_message(order, kind, &self.admin_base_url);

        let buyer = self.deliver(Audience::Buyer, Some(order.buyer.phone.as_str()), &buyer_body);
        let admin = self.deliver(Audience::Admin, self.admin_phone.as_deref(), &admin_body);
        let (buyer, admin) = tokio::join!(buyer, admin);

        NotificationReport { buyer, admin }
    }

    async fn deliver(&self, audience: Audience, raw_phone: Option<&str>, body: &str) -> Delivery {
        let Some(raw_phone) = raw_phone else {
            return Delivery::Skipped {
                reason: format!("no {} phone configured", audience.as_ref()),
            };
        };

        let result = match phone::normalize_msisdn(raw_phone, &self.default_country_code) {
            Ok(to) => self.client.send_message(&to, body).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(receipt) => Delivery::Sent {
                message_id: receipt.id,
            },
            Err(err) => {
                NOTIFICATION_FAILURES
                    .with_label_values(&[audience.as_ref()])
                    .inc();
                warn!(audience = audience.as_ref(), error = %err, "notification delivery failed");
                Delivery::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}
