use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::metrics::{ORDERS_PLACED, STATUS_TRANSITIONS};
use crate::models::{
    validate_line_items, BuyerSnapshot, ItemProvenance, Language, NewLineItem, Order,
    OrderStatus, PaymentMethod, PaymentStatus, StatusHistoryEntry,
};
use crate::notifications::{NotificationDispatcher, NotificationKind};
use crate::repositories::OrderRepository;
use crate::services::amendments::AmendmentEngine;
use crate::services::billing::BillingService;
use crate::services::order_numbers::OrderNumberGenerator;
use crate::services::pricing::compute_totals;

/// Attempts at claiming a fresh order number before giving up.
const MAX_NUMBERING_ATTEMPTS: usize = 3;

/// Checkout submission from the storefront.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub line_items: Vec<NewLineItem>,
    #[validate]
    pub buyer: BuyerSnapshot,
    pub delivery_date: NaiveDate,
    #[validate(length(min = 1, message = "a delivery time slot is required"))]
    pub delivery_time_slot: String,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub language: Language,
    /// When set, the items are merged into this order instead.
    #[serde(default)]
    pub original_order_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct PlaceOrderOutcome {
    pub order: Order,
    pub message: String,
    pub redirect_url: Option<String>,
    pub warnings: Vec<String>,
}

/// Order creation, admin transitions and the small admin operations around them.
#[derive(Clone)]
pub struct OrderLifecycleService {
    repository: Arc<dyn OrderRepository>,
    numbers: OrderNumberGenerator,
    dispatcher: NotificationDispatcher,
    billing: BillingService,
    amendments: AmendmentEngine,
}

impl OrderLifecycleService {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        numbers: OrderNumberGenerator,
        dispatcher: NotificationDispatcher,
        billing: BillingService,
        amendments: AmendmentEngine,
    ) -> Self {
        Self {
            repository,
            numbers,
            dispatcher,
            billing,
            amendments,
        }
    }

    #[instrument(skip(self, request), fields(payment_method = request.payment_method.as_ref(), items = request.line_items.len()))]
    pub async fn place_order(
        &self,
        request: PlaceOrderRequest,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        if let Some(original_order_id) = request.original_order_id {
            return self.amend_existing(original_order_id, request.line_items).await;
        }

        validate_line_items(&request.line_items)?;
        request.validate()?;

        let order = self.create_with_fresh_number(request).await?;
        ORDERS_PLACED
            .with_label_values(&[order.payment_method.as_ref()])
            .inc();
        info!(order_id = %order.id, order_number = %order.order_number, total = %order.total, "order placed");

        match order.payment_method {
            PaymentMethod::CashOnDelivery => {
                let report = self.dispatcher.notify(&order, NotificationKind::Created).await;
                Ok(PlaceOrderOutcome {
                    message: format!("Order {} placed successfully", order.order_number),
                    order,
                    redirect_url: None,
                    warnings: report.warnings(),
                })
            }
            PaymentMethod::OnlineBanking => match self.billing.request_payment(&order).await {
                Ok(billed) => Ok(PlaceOrderOutcome {
                    message: format!(
                        "Order {} created; complete payment to confirm it",
                        billed.order_number
                    ),
                    redirect_url: billed.payment_url.clone(),
                    order: billed,
                    warnings: Vec::new(),
                }),
                // Amended while billing; the payment can be retried.
                Err(err @ ServiceError::ConcurrentModification(_)) => Err(err),
                Err(err) => {
                    self.cancel_unbilled(&order).await;
                    Err(match err {
                        ServiceError::GatewayError(_) => err,
                        other => ServiceError::GatewayError(other.to_string()),
                    })
                }
            },
        }
    }

    async fn amend_existing(
        &self,
        order_id: Uuid,
        items: Vec<NewLineItem>,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        let outcome = self.amendments.amend(order_id, items).await?;
        let order = outcome.order;
        let redirect_url = match (order.payment_method, order.payment_status) {
            (PaymentMethod::OnlineBanking, status) if status != PaymentStatus::Paid => {
                order.payment_url.clone()
            }
            _ => None,
        };
        Ok(PlaceOrderOutcome {
            message: format!("Order {} updated with additional items", order.order_number),
            order,
            redirect_url,
            warnings: outcome.warnings,
        })
    }

    async fn create_with_fresh_number(
        &self,
        request: PlaceOrderRequest,
    ) -> Result<Order, ServiceError> {
        let now = Utc::now();
        let status = request.payment_method.initial_status();
        let line_items: Vec<_> = request
            .line_items
            .into_iter()
            .map(|item| item.into_line_item(ItemProvenance::Original))
            .collect();
        let totals = compute_totals(&line_items);

        let mut order = Order {
            id: Uuid::new_v4(),
            order_number: String::new(),
            buyer: request.buyer,
            line_items,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            total: totals.total,
            status,
            payment_method: request.payment_method,
            payment_status: PaymentStatus::AwaitingPayment,
            status_history: vec![StatusHistoryEntry {
                status,
                timestamp: now,
            }],
            is_amendable: false,
            delivery_date: request.delivery_date,
            delivery_time_slot: request.delivery_time_slot,
            language: request.language,
            amount_paid: Decimal::ZERO,
            gateway_bill_reference: None,
            gateway_bill_amount: None,
            payment_url: None,
            settled_bill_references: Vec::new(),
            delivery_verification: None,
            e_invoice: None,
            created_at: now,
            updated_at: now,
        };

        for attempt in 1..=MAX_NUMBERING_ATTEMPTS {
            order.order_number = self.numbers.next(now).await?;
            match self.repository.create(order.clone()).await {
                Ok(_) => return Ok(order),
                Err(ServiceError::Conflict(reason)) if attempt < MAX_NUMBERING_ATTEMPTS => {
                    warn!(attempt, order_number = %order.order_number, %reason, "order number taken; retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ServiceError::Conflict(
            "could not allocate a unique order number".into(),
        ))
    }

    /// Best effort: the gateway error is what the caller sees either way.
    async fn cancel_unbilled(&self, order: &Order) {
        let result = self
            .repository
            .transactional_update(order.id, &mut |order| {
                if order.status.is_final() {
                    return Ok(false);
                }
                order.record_status(OrderStatus::Cancelled, Utc::now());
                Ok(true)
            })
            .await;
        match result {
            Ok(_) => {
                STATUS_TRANSITIONS
                    .with_label_values(&[OrderStatus::Cancelled.as_ref()])
                    .inc();
                warn!(order_id = %order.id, order_number = %order.order_number, "bill creation failed; order cancelled");
            }
            Err(err) => {
                error!(order_id = %order.id, error = %err, "failed to cancel order after bill creation failure");
            }
        }
    }

    /// Admin status change. Final statuses cannot be left, not even for
    /// themselves; re-applying any other current status is a no-op.
    #[instrument(skip(self), fields(order_id = %order_id, to = status.as_ref()))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, ServiceError> {
        let mut changed = false;
        let order = self
            .repository
            .transactional_update(order_id, &mut |order| {
                changed = false;
                if order.status.is_final() {
                    return Err(ServiceError::InvalidTransition(format!(
                        "order {} is {} and cannot move to {}",
                        order.order_number, order.status, status
                    )));
                }
                if order.status == status {
                    return Ok(false);
                }
                order.record_status(status, Utc::now());
                changed = true;
                Ok(true)
            })
            .await?;

        if changed {
            STATUS_TRANSITIONS.with_label_values(&[status.as_ref()]).inc();
            info!(order_number = %order.order_number, "status updated");
        }
        Ok(order)
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn set_amendable(
        &self,
        order_id: Uuid,
        is_amendable: bool,
    ) -> Result<Order, ServiceError> {
        self.repository
            .transactional_update(order_id, &mut |order| {
                if order.is_amendable == is_amendable {
                    return Ok(false);
                }
                order.is_amendable = is_amendable;
                Ok(true)
            })
            .await
    }

    /// Issues a fresh bill for whatever is still owed.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn retry_payment(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let order = self.repository.get(order_id).await?;
        if order.payment_method != PaymentMethod::OnlineBanking {
            return Err(ServiceError::BadRequest(format!(
                "order {} is paid on delivery",
                order.order_number
            )));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::BadRequest(format!(
                "order {} is already paid",
                order.order_number
            )));
        }
        if order.status.is_final() {
            return Err(ServiceError::InvalidTransition(format!(
                "order {} is {}",
                order.order_number, order.status
            )));
        }
        self.billing.request_payment(&order).await
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.repository.get(order_id).await
    }

    pub async fn get_by_number(&self, order_number: &str) -> Result<Order, ServiceError> {
        self.repository.find_by_order_number(order_number).await
    }

    /// One page of orders, newest first, with the overall count. `page` starts at 1.
    pub async fn list(&self, page: u64, limit: u64) -> Result<(Vec<Order>, u64), ServiceError> {
        let offset = page.saturating_sub(1).saturating_mul(limit);
        let orders = self.repository.list(offset, limit).await?;
        let total = self.repository.count().await?;
        Ok((orders, total))
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        self.repository.delete(order_id).await?;
        info!("order deleted");
        Ok(())
    }
}
