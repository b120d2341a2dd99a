use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use crate::errors::ServiceError;
use crate::models::{Order, PaymentStatus};
use crate::payments::{BillRequest, PaymentGateway};
use crate::repositories::OrderRepository;
use crate::services::pricing::{round_for_display, to_minor_units};

/// Issues gateway bills for whatever is still owed on an order.
#[derive(Clone)]
pub struct BillingService {
    repository: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl BillingService {
    pub fn new(repository: Arc<dyn OrderRepository>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            repository,
            gateway,
        }
    }

    /// Creates a bill for `total - amount_paid` and records its reference,
    /// amount and payment URL on the order.
    #[instrument(skip(self, order), fields(order_id = %order.id, order_number = %order.order_number))]
    pub async fn request_payment(&self, order: &Order) -> Result<Order, ServiceError> {
        let amount = round_for_display(order.outstanding_amount());
        if amount <= Decimal::ZERO {
            return Err(ServiceError::BadRequest(format!(
                "order {} has nothing left to pay",
                order.order_number
            )));
        }

        let request = BillRequest {
            order_number: order.order_number.clone(),
            description: bill_description(order),
            amount_cents: to_minor_units(amount)?,
            payer_name: order.buyer.business_name.clone(),
            payer_email: order.buyer.email.clone(),
            payer_phone: order.buyer.phone.clone(),
        };

        let bill = self.gateway.create_bill(request).await.map_err(|e| {
            error!(order_number = %order.order_number, error = %e, "bill creation failed");
            ServiceError::from(e)
        })?;
        info!(bill_code = %bill.bill_code, %amount, "bill issued");

        // The order may have been paid or amended while the gateway call ran.
        let mut superseded = false;
        let updated = self
            .repository
            .transactional_update(order.id, &mut |current| {
                superseded = current.payment_status == PaymentStatus::Paid
                    || round_for_display(current.outstanding_amount()) != amount;
                if superseded {
                    return Ok(false);
                }
                current.gateway_bill_reference = Some(bill.bill_code.clone());
                current.gateway_bill_amount = Some(amount);
                current.payment_url = Some(bill.payment_url.clone());
                if current.payment_status == PaymentStatus::Failed {
                    current.payment_status = PaymentStatus::AwaitingPayment;
                }
                Ok(true)
            })
            .await?;

        if superseded {
            warn!(
                bill_code = %bill.bill_code,
                %amount,
                payment_status = updated.payment_status.as_ref(),
                outstanding = %updated.outstanding_amount(),
                "order changed while the bill was issued; bill not recorded"
            );
            return Err(ServiceError::ConcurrentModification(updated.id));
        }
        Ok(updated)
    }
}

fn bill_description(order: &Order) -> String {
    order
        .line_items
        .iter()
        .map(|item| format!("{} x{}", item.name, item.quantity))
        .collect::<Vec<_>>()
        .join(", ")
}
