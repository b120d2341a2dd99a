//! Post-delivery steps backed by the hosted AI flows: photo verification of a
//! delivery and e-invoice generation. Both are optional collaborators; when
//! one is not configured the operation answers `ServiceUnavailable`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::ai::{AiFlowError, DeliveryVerifier, EInvoiceGenerator, EInvoiceLine, EInvoiceRequest};
use crate::config::AiFlowsConfig;
use crate::errors::ServiceError;
use crate::models::{DeliveryVerification, EInvoice, Order, OrderStatus};
use crate::repositories::OrderRepository;

const INVOICE_CURRENCY: &str = "MYR";

#[derive(Clone)]
pub struct FulfillmentService {
    repository: Arc<dyn OrderRepository>,
    verifier: Option<Arc<dyn DeliveryVerifier>>,
    invoicer: Option<Arc<dyn EInvoiceGenerator>>,
    verification_timeout: Duration,
    invoice_timeout: Duration,
    business_offset: FixedOffset,
}

impl FulfillmentService {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        verifier: Option<Arc<dyn DeliveryVerifier>>,
        invoicer: Option<Arc<dyn EInvoiceGenerator>>,
        config: &AiFlowsConfig,
        business_offset: FixedOffset,
    ) -> Self {
        Self {
            repository,
            verifier,
            invoicer,
            verification_timeout: Duration::from_secs(config.delivery_verification_timeout_secs),
            invoice_timeout: Duration::from_secs(config.e_invoice_timeout_secs),
            business_offset,
        }
    }

    /// Runs the delivery photo through the verification flow and records the
    /// assessment on the order. The order status is left to the admin.
    #[instrument(skip(self, photo_data_uri), fields(order_id = %order_id))]
    pub async fn verify_delivery(
        &self,
        order_id: Uuid,
        photo_data_uri: &str,
    ) -> Result<Order, ServiceError> {
        if !photo_data_uri.starts_with("data:image/") {
            return Err(ServiceError::ValidationError(
                "photo must be an image data URI".into(),
            ));
        }
        let verifier = self.verifier.as_ref().ok_or_else(|| {
            ServiceError::ServiceUnavailable("delivery verification is not configured".into())
        })?;

        let order = self.repository.get(order_id).await?;
        let assessment = with_deadline(
            "delivery verification",
            self.verification_timeout,
            verifier.verify_delivery(photo_data_uri, &order.order_number),
        )
        .await?;

        if !(0.0..=1.0).contains(&assessment.confidence) {
            return Err(ServiceError::ExternalServiceError(format!(
                "delivery verification returned confidence {}",
                assessment.confidence
            )));
        }
        if !assessment.is_completed {
            warn!(order_number = %order.order_number, confidence = assessment.confidence, "delivery photo not accepted");
        }

        let verification = DeliveryVerification {
            completed: assessment.is_completed,
            confidence: assessment.confidence,
            notes: assessment.notes,
            verified_at: Utc::now(),
        };
        let order = self
            .repository
            .transactional_update(order_id, &mut |order| {
                order.delivery_verification = Some(verification.clone());
                Ok(true)
            })
            .await?;
        info!(order_number = %order.order_number, completed = verification.completed, "delivery verification recorded");
        Ok(order)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn generate_e_invoice(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let invoicer = self.invoicer.as_ref().ok_or_else(|| {
            ServiceError::ServiceUnavailable("e-invoicing is not configured".into())
        })?;

        let order = self.repository.get(order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::BadRequest(format!(
                "order {} is cancelled and cannot be invoiced",
                order.order_number
            )));
        }

        let request = self.invoice_request(&order);
        let document = with_deadline(
            "e-invoice generation",
            self.invoice_timeout,
            invoicer.generate_e_invoice(&request),
        )
        .await?;
        if document.invoice_number.trim().is_empty() {
            return Err(ServiceError::ExternalServiceError(
                "e-invoice flow returned no invoice number".into(),
            ));
        }

        let invoice = EInvoice {
            invoice_number: document.invoice_number,
            status: document.status,
            validation_url: document.validation_url,
            issued_at: Utc::now(),
        };
        let order = self
            .repository
            .transactional_update(order_id, &mut |order| {
                order.e_invoice = Some(invoice.clone());
                Ok(true)
            })
            .await?;
        info!(order_number = %order.order_number, invoice_number = %invoice.invoice_number, "e-invoice recorded");
        Ok(order)
    }

    fn invoice_request(&self, order: &Order) -> EInvoiceRequest {
        EInvoiceRequest {
            order_number: order.order_number.clone(),
            issue_date: Utc::now().with_timezone(&self.business_offset).date_naive(),
            buyer_name: order.buyer.business_name.clone(),
            buyer_address: order.buyer.address.clone(),
            buyer_email: order.buyer.email.clone(),
            lines: order
                .line_items
                .iter()
                .map(|item| EInvoiceLine {
                    description: item.name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total(),
                    taxable: item.taxable,
                })
                .collect(),
            subtotal: order.subtotal,
            tax_amount: order.tax_amount,
            total: order.total,
            currency: INVOICE_CURRENCY,
        }
    }
}

async fn with_deadline<T>(
    what: &str,
    deadline: Duration,
    call: impl Future<Output = Result<T, AiFlowError>>,
) -> Result<T, ServiceError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(_) => Err(ServiceError::Timeout(format!(
            "{what} did not answer within {}s",
            deadline.as_secs()
        ))),
    }
}
