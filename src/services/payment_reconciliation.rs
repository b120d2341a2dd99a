//! Applies gateway bill notifications to orders.
//!
//! Callbacks arrive asynchronously, possibly duplicated and out of order.
//! Every callback is authenticated first, then applied inside one
//! `transactional_update`, and the decision of what to change is made by
//! [`apply_callback`] against the freshly read order so repeats are no-ops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use strum::AsRefStr;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::metrics::{PAYMENT_CALLBACKS, STATUS_TRANSITIONS};
use crate::models::{Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::notifications::{NotificationDispatcher, NotificationKind, NotificationReport};
use crate::repositories::OrderRepository;
use crate::webhooks::{CallbackSigner, CallbackStatus, GatewayCallback};

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ReconciliationOutcome {
    /// Payment settled and the order released to fulfilment.
    Confirmed,
    /// Payment settled on an order already past the payment gate.
    PaymentRecorded,
    /// Money arrived for an order an admin had cancelled.
    PaidWhileCancelled,
    /// A second bill was paid on an order that was already settled.
    Overpaid,
    AlreadyPaid,
    /// Payment failed and the unpaid order was cancelled.
    Cancelled,
    /// A top-up bill failed; earlier payments keep the order alive.
    PaymentFailed,
    AlreadyFailed,
    FailureIgnored,
    PendingConfirmation,
    PendingIgnored,
    /// Callback for a bill that has since been replaced.
    StaleBill,
    UnknownOrder,
}

impl ReconciliationOutcome {
    pub fn mutates(self) -> bool {
        matches!(
            self,
            Self::Confirmed
                | Self::PaymentRecorded
                | Self::PaidWhileCancelled
                | Self::Overpaid
                | Self::Cancelled
                | Self::PaymentFailed
                | Self::PendingConfirmation
        )
    }
}

/// Decides and applies the effect of one callback on `order`.
///
/// Leaves `order` untouched for every outcome whose
/// [`mutates`](ReconciliationOutcome::mutates) is false.
pub fn apply_callback(
    order: &mut Order,
    bill_code: &str,
    status: CallbackStatus,
    now: DateTime<Utc>,
) -> ReconciliationOutcome {
    if order.settled_bill_references.iter().any(|b| b == bill_code) {
        return match status {
            CallbackStatus::Success => ReconciliationOutcome::AlreadyPaid,
            CallbackStatus::Pending => ReconciliationOutcome::PendingIgnored,
            CallbackStatus::Failed => ReconciliationOutcome::FailureIgnored,
        };
    }
    if let Some(current) = order.gateway_bill_reference.as_deref() {
        if current != bill_code {
            return ReconciliationOutcome::StaleBill;
        }
    }

    let outcome = match status {
        CallbackStatus::Success => apply_success(order, bill_code, now),
        CallbackStatus::Failed => apply_failure(order, now),
        CallbackStatus::Pending => {
            if order.payment_status == PaymentStatus::AwaitingPayment {
                order.payment_status = PaymentStatus::PendingConfirmation;
                ReconciliationOutcome::PendingConfirmation
            } else {
                ReconciliationOutcome::PendingIgnored
            }
        }
    };

    if outcome.mutates() && order.gateway_bill_reference.is_none() {
        order.gateway_bill_reference = Some(bill_code.to_string());
    }
    outcome
}

fn apply_success(order: &mut Order, bill_code: &str, now: DateTime<Utc>) -> ReconciliationOutcome {
    if order.payment_status == PaymentStatus::Paid {
        // An unsettled bill paid on an order that owes nothing: keep the money.
        order.amount_paid += order.gateway_bill_amount.unwrap_or(Decimal::ZERO);
        order.settled_bill_references.push(bill_code.to_string());
        return ReconciliationOutcome::Overpaid;
    }

    let failed_before = order.payment_status == PaymentStatus::Failed;
    let amount = order
        .gateway_bill_amount
        .unwrap_or_else(|| order.outstanding_amount());
    order.amount_paid += amount;
    order.payment_status = PaymentStatus::Paid;
    order.settled_bill_references.push(bill_code.to_string());

    match order.status {
        OrderStatus::Created | OrderStatus::AwaitingPayment => {
            order.record_status(OrderStatus::Processing, now);
            ReconciliationOutcome::Confirmed
        }
        // Cancelled by an earlier failure callback for this same bill.
        OrderStatus::Cancelled if failed_before && order.amount_paid == amount => {
            order.record_status(OrderStatus::Processing, now);
            ReconciliationOutcome::Confirmed
        }
        OrderStatus::Cancelled => ReconciliationOutcome::PaidWhileCancelled,
        _ => ReconciliationOutcome::PaymentRecorded,
    }
}

fn apply_failure(order: &mut Order, now: DateTime<Utc>) -> ReconciliationOutcome {
    match (order.payment_status, order.status) {
        (PaymentStatus::Paid, _) => ReconciliationOutcome::FailureIgnored,
        (PaymentStatus::Failed, _) | (_, OrderStatus::Cancelled) => {
            ReconciliationOutcome::AlreadyFailed
        }
        // Delivered goods are settled with the buyer directly.
        (_, status) if status.blocks_amendment() => ReconciliationOutcome::FailureIgnored,
        _ if order.amount_paid > Decimal::ZERO => {
            order.payment_status = PaymentStatus::Failed;
            ReconciliationOutcome::PaymentFailed
        }
        _ => {
            order.payment_status = PaymentStatus::Failed;
            order.record_status(OrderStatus::Cancelled, now);
            ReconciliationOutcome::Cancelled
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub outcome: ReconciliationOutcome,
    pub order_id: Option<Uuid>,
    pub notification: Option<NotificationReport>,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    repository: Arc<dyn OrderRepository>,
    signer: CallbackSigner,
    dispatcher: NotificationDispatcher,
    ack_unknown_orders: bool,
}

impl PaymentReconciler {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        signer: CallbackSigner,
        dispatcher: NotificationDispatcher,
        ack_unknown_orders: bool,
    ) -> Self {
        Self {
            repository,
            signer,
            dispatcher,
            ack_unknown_orders,
        }
    }

    #[instrument(skip(self, callback), fields(bill_code = %callback.bill_code, order_number = %callback.order_number, status = callback.status.as_ref()))]
    pub async fn handle(&self, callback: &GatewayCallback) -> Result<CallbackResult, ServiceError> {
        if !self.signer.verify(
            &callback.bill_code,
            &callback.order_number,
            &callback.status_code,
            &callback.signature,
        ) {
            PAYMENT_CALLBACKS
                .with_label_values(&["invalid_signature"])
                .inc();
            warn!(payload = %callback.loggable_payload(), "rejecting callback with bad signature");
            return Err(ServiceError::InvalidSignature(format!(
                "signature mismatch for bill {}",
                callback.bill_code
            )));
        }

        let Some(order) = self.locate(callback).await? else {
            PAYMENT_CALLBACKS
                .with_label_values(&[ReconciliationOutcome::UnknownOrder.as_ref()])
                .inc();
            warn!(payload = %callback.loggable_payload(), "callback for unknown order");
            if self.ack_unknown_orders {
                return Ok(CallbackResult {
                    outcome: ReconciliationOutcome::UnknownOrder,
                    order_id: None,
                    notification: None,
                });
            }
            return Err(ServiceError::NotFound(format!(
                "No order for bill {} / {}",
                callback.bill_code, callback.order_number
            )));
        };

        let mut outcome = ReconciliationOutcome::FailureIgnored;
        let updated = self
            .repository
            .transactional_update(order.id, &mut |order| {
                outcome = apply_callback(order, &callback.bill_code, callback.status, Utc::now());
                Ok(outcome.mutates())
            })
            .await?;

        PAYMENT_CALLBACKS
            .with_label_values(&[outcome.as_ref()])
            .inc();
        match outcome {
            ReconciliationOutcome::Confirmed => {
                STATUS_TRANSITIONS
                    .with_label_values(&[OrderStatus::Processing.as_ref()])
                    .inc();
                info!(order_id = %updated.id, "payment confirmed");
            }
            ReconciliationOutcome::Cancelled => {
                STATUS_TRANSITIONS
                    .with_label_values(&[OrderStatus::Cancelled.as_ref()])
                    .inc();
                info!(order_id = %updated.id, "payment failed; order cancelled");
            }
            ReconciliationOutcome::PaidWhileCancelled
            | ReconciliationOutcome::Overpaid
            | ReconciliationOutcome::StaleBill => {
                warn!(
                    order_id = %updated.id,
                    outcome = outcome.as_ref(),
                    payload = %callback.loggable_payload(),
                    "callback needs manual review"
                );
            }
            other => info!(order_id = %updated.id, outcome = other.as_ref(), "callback processed"),
        }

        let notification = if outcome == ReconciliationOutcome::Confirmed
            && updated.payment_method == PaymentMethod::OnlineBanking
        {
            Some(self.dispatcher.notify(&updated, NotificationKind::Created).await)
        } else {
            None
        };

        Ok(CallbackResult {
            outcome,
            order_id: Some(updated.id),
            notification,
        })
    }

    /// Bill reference first, then the order number the gateway echoes back.
    async fn locate(&self, callback: &GatewayCallback) -> Result<Option<Order>, ServiceError> {
        match self
            .repository
            .find_by_gateway_bill_reference(&callback.bill_code)
            .await
        {
            Ok(order) => return Ok(Some(order)),
            Err(ServiceError::NotFound(_)) => {}
            Err(other) => return Err(other),
        }
        match self
            .repository
            .find_by_order_number(&callback.order_number)
            .await
        {
            Ok(order) => Ok(Some(order)),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::fixtures;
    use rust_decimal_macros::dec;

    fn awaiting_payment() -> Order {
        let mut order = fixtures::order(
            "PA0001070724",
            PaymentMethod::OnlineBanking,
            vec![fixtures::line("p1", 2, dec!(10.00), true)],
        );
        order.gateway_bill_reference = Some("bill-1".into());
        order.gateway_bill_amount = Some(dec!(21.20));
        order
    }

    #[test]
    fn success_marks_paid_and_releases_order_once() {
        let mut order = awaiting_payment();
        let now = Utc::now();

        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Success, now),
            ReconciliationOutcome::Confirmed
        );
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.amount_paid, dec!(21.20));
        assert_eq!(order.status_history.len(), 2);

        let snapshot = order.clone();
        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Success, now),
            ReconciliationOutcome::AlreadyPaid
        );
        assert_eq!(order, snapshot);
    }

    #[test]
    fn failure_never_downgrades_a_paid_order() {
        let mut order = awaiting_payment();
        apply_callback(&mut order, "bill-1", CallbackStatus::Success, Utc::now());
        let snapshot = order.clone();

        let outcome = apply_callback(&mut order, "bill-1", CallbackStatus::Failed, Utc::now());
        assert!(!outcome.mutates());
        assert_eq!(order, snapshot);
    }

    #[test]
    fn failure_cancels_unpaid_order_and_repeats_are_noops() {
        let mut order = awaiting_payment();
        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Failed, Utc::now()),
            ReconciliationOutcome::Cancelled
        );
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Failed, Utc::now()),
            ReconciliationOutcome::AlreadyFailed
        );
        assert_eq!(order.status_history.len(), 2);
    }

    #[test]
    fn success_after_failure_on_same_bill_revives_order() {
        let mut order = awaiting_payment();
        apply_callback(&mut order, "bill-1", CallbackStatus::Failed, Utc::now());
        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Success, Utc::now()),
            ReconciliationOutcome::Confirmed
        );
        assert_eq!(order.status, OrderStatus::Processing);
        assert!(order.is_history_consistent());
    }

    #[test]
    fn admin_cancelled_order_stays_cancelled_when_paid() {
        let mut order = awaiting_payment();
        order.record_status(OrderStatus::Cancelled, Utc::now());
        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Success, Utc::now()),
            ReconciliationOutcome::PaidWhileCancelled
        );
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn pending_only_moves_awaiting_payment() {
        let mut order = awaiting_payment();
        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Pending, Utc::now()),
            ReconciliationOutcome::PendingConfirmation
        );
        assert_eq!(order.payment_status, PaymentStatus::PendingConfirmation);
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Pending, Utc::now()),
            ReconciliationOutcome::PendingIgnored
        );
    }

    #[test]
    fn superseded_bills_are_stale() {
        let mut order = awaiting_payment();
        let snapshot = order.clone();
        assert_eq!(
            apply_callback(&mut order, "bill-0", CallbackStatus::Success, Utc::now()),
            ReconciliationOutcome::StaleBill
        );
        assert_eq!(order, snapshot);
    }

    #[test]
    fn top_up_bill_failure_keeps_paid_order_alive() {
        let mut order = awaiting_payment();
        apply_callback(&mut order, "bill-1", CallbackStatus::Success, Utc::now());
        // Amendment raised the total and issued a second bill.
        order.payment_status = PaymentStatus::AwaitingPayment;
        order.gateway_bill_reference = Some("bill-2".into());
        order.gateway_bill_amount = Some(dec!(5.00));

        assert_eq!(
            apply_callback(&mut order, "bill-2", CallbackStatus::Failed, Utc::now()),
            ReconciliationOutcome::PaymentFailed
        );
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Success, Utc::now()),
            ReconciliationOutcome::AlreadyPaid
        );
        assert_eq!(
            apply_callback(&mut order, "bill-2", CallbackStatus::Success, Utc::now()),
            ReconciliationOutcome::PaymentRecorded
        );
        assert_eq!(order.amount_paid, dec!(26.20));
    }

    #[test]
    fn late_failure_does_not_cancel_delivered_order() {
        let mut order = awaiting_payment();
        order.record_status(OrderStatus::Delivered, Utc::now());
        let snapshot = order.clone();

        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Failed, Utc::now()),
            ReconciliationOutcome::FailureIgnored
        );
        assert_eq!(order, snapshot);
    }

    #[test]
    fn unsettled_bill_paid_on_settled_order_is_kept_for_review() {
        let mut order = awaiting_payment();
        order.payment_status = PaymentStatus::Paid;
        order.amount_paid = dec!(21.20);
        order.record_status(OrderStatus::Processing, Utc::now());

        let outcome = apply_callback(&mut order, "bill-1", CallbackStatus::Success, Utc::now());
        assert_eq!(outcome, ReconciliationOutcome::Overpaid);
        assert!(outcome.mutates());
        assert_eq!(order.amount_paid, dec!(42.40));
        assert_eq!(order.settled_bill_references, vec!["bill-1".to_string()]);
        assert_eq!(order.status, OrderStatus::Processing);

        assert_eq!(
            apply_callback(&mut order, "bill-1", CallbackStatus::Success, Utc::now()),
            ReconciliationOutcome::AlreadyPaid
        );
        assert_eq!(order.amount_paid, dec!(42.40));
    }

    #[test]
    fn order_without_reference_adopts_callback_bill() {
        let mut order = awaiting_payment();
        order.gateway_bill_reference = None;
        apply_callback(&mut order, "bill-9", CallbackStatus::Success, Utc::now());
        assert_eq!(order.gateway_bill_reference.as_deref(), Some("bill-9"));
    }
}
