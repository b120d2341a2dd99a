//! Adding items to an order that is still open for changes.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::metrics::AMENDMENTS;
use crate::models::{
    validate_line_items, ItemProvenance, NewLineItem, Order, PaymentMethod, PaymentStatus,
};
use crate::notifications::{NotificationDispatcher, NotificationKind};
use crate::repositories::OrderRepository;
use crate::services::billing::BillingService;
use crate::services::pricing::compute_totals;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmendmentSummary {
    pub added: usize,
    pub updated: usize,
    pub previous_total: Decimal,
    pub new_total: Decimal,
}

/// Merges `items` into `order` by `(product_id, variant_id)`.
///
/// Matching lines gain quantity and become `updated`; the rest are appended as
/// `added`. Totals are recomputed, the amendment window closes and the order
/// goes back to awaiting payment.
pub fn merge_additional_items(
    order: &mut Order,
    items: &[NewLineItem],
) -> Result<AmendmentSummary, ServiceError> {
    if !order.is_amendable {
        return Err(ServiceError::NotAmendable(format!(
            "order {} is not open for amendment",
            order.order_number
        )));
    }
    if order.status.blocks_amendment() {
        return Err(ServiceError::NotAmendable(format!(
            "order {} is {} and can no longer be amended",
            order.order_number, order.status
        )));
    }
    validate_line_items(items)?;

    let previous_total = order.total;
    let mut appended: HashSet<usize> = HashSet::new();
    let mut updated: HashSet<usize> = HashSet::new();

    for item in items {
        let incoming = item.clone().into_line_item(ItemProvenance::Added);
        let existing = order
            .line_items
            .iter()
            .position(|line| line.merge_key() == incoming.merge_key());

        match existing {
            Some(index) => {
                let line = &mut order.line_items[index];
                line.quantity = line.quantity.checked_add(incoming.quantity).ok_or_else(|| {
                    ServiceError::ValidationError(format!("quantity overflow for {}", line.name))
                })?;
                if !appended.contains(&index) {
                    line.provenance = ItemProvenance::Updated;
                    updated.insert(index);
                }
            }
            None => {
                appended.insert(order.line_items.len());
                order.line_items.push(incoming);
            }
        }
    }

    order.apply_totals(compute_totals(&order.line_items));
    order.is_amendable = false;
    order.payment_status = PaymentStatus::AwaitingPayment;

    Ok(AmendmentSummary {
        added: appended.len(),
        updated: updated.len(),
        previous_total,
        new_total: order.total,
    })
}

#[derive(Debug, Clone)]
pub struct AmendmentOutcome {
    pub order: Order,
    pub summary: AmendmentSummary,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct AmendmentEngine {
    repository: Arc<dyn OrderRepository>,
    dispatcher: NotificationDispatcher,
    billing: BillingService,
}

impl AmendmentEngine {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        dispatcher: NotificationDispatcher,
        billing: BillingService,
    ) -> Self {
        Self {
            repository,
            dispatcher,
            billing,
        }
    }

    /// Commits the merge, notifies buyer and admin, then bills online orders
    /// for the difference. A billing failure is returned as `GatewayError`
    /// with the amendment already committed.
    #[instrument(skip(self, items), fields(order_id = %order_id, items = items.len()))]
    pub async fn amend(
        &self,
        order_id: Uuid,
        items: Vec<NewLineItem>,
    ) -> Result<AmendmentOutcome, ServiceError> {
        validate_line_items(&items)?;

        let mut summary = None;
        let order = self
            .repository
            .transactional_update(order_id, &mut |order| {
                summary = Some(merge_additional_items(order, &items)?);
                Ok(true)
            })
            .await?;
        let summary = summary.ok_or_else(|| {
            ServiceError::InternalError("amendment committed without a summary".into())
        })?;

        AMENDMENTS.inc();
        info!(
            order_number = %order.order_number,
            added = summary.added,
            updated = summary.updated,
            new_total = %summary.new_total,
            "order amended"
        );

        let report = self.dispatcher.notify(&order, NotificationKind::Amended).await;
        let warnings = report.warnings();

        let order = if order.payment_method == PaymentMethod::OnlineBanking
            && order.outstanding_amount() > Decimal::ZERO
        {
            self.billing.request_payment(&order).await.map_err(|e| {
                warn!(order_number = %order.order_number, error = %e, "amendment committed but billing failed");
                e
            })?
        } else {
            order
        };

        Ok(AmendmentOutcome {
            order,
            summary,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::fixtures;
    use crate::models::OrderStatus;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn new_item(product_id: &str, variant_id: Option<&str>, quantity: u32) -> NewLineItem {
        NewLineItem {
            product_id: product_id.into(),
            variant_id: variant_id.map(str::to_string),
            name: format!("Product {product_id}"),
            name_translations: BTreeMap::new(),
            unit: Some("kg".into()),
            quantity,
            unit_price: dec!(2.00),
            taxable: true,
        }
    }

    fn amendable_order() -> Order {
        let mut order = fixtures::order(
            "PA0001070724",
            PaymentMethod::CashOnDelivery,
            vec![fixtures::line("p1", 3, dec!(2.00), true)],
        );
        order.is_amendable = true;
        order
    }

    #[test]
    fn matching_key_adds_quantity_and_marks_updated() {
        let mut order = amendable_order();
        let summary = merge_additional_items(&mut order, &[new_item("p1", None, 2)]).unwrap();

        assert_eq!(order.line_items.len(), 1);
        assert_eq!(order.line_items[0].quantity, 5);
        assert_eq!(order.line_items[0].provenance, ItemProvenance::Updated);
        assert_eq!(summary.updated, 1);
        assert_eq!(order.subtotal, dec!(10.00));
        assert_eq!(order.total, dec!(10.60));
        assert!(!order.is_amendable);
        assert_eq!(order.payment_status, PaymentStatus::AwaitingPayment);
    }

    #[test]
    fn new_keys_are_appended_as_added() {
        let mut order = amendable_order();
        merge_additional_items(
            &mut order,
            &[new_item("p1", Some("500g"), 1), new_item("p2", None, 4)],
        )
        .unwrap();

        assert_eq!(order.line_items.len(), 3);
        assert_eq!(order.line_items[0].provenance, ItemProvenance::Original);
        assert!(order.line_items[1..]
            .iter()
            .all(|line| line.provenance == ItemProvenance::Added));
    }

    #[test]
    fn duplicates_within_one_submission_stay_added() {
        let mut order = amendable_order();
        let summary = merge_additional_items(
            &mut order,
            &[new_item("p2", None, 1), new_item("p2", None, 2)],
        )
        .unwrap();

        assert_eq!(order.line_items[1].quantity, 3);
        assert_eq!(order.line_items[1].provenance, ItemProvenance::Added);
        assert_eq!((summary.added, summary.updated), (1, 0));
    }

    #[test]
    fn closed_or_finished_orders_reject_amendment() {
        let mut order = amendable_order();
        order.is_amendable = false;
        assert_matches!(
            merge_additional_items(&mut order, &[new_item("p1", None, 1)]),
            Err(ServiceError::NotAmendable(_))
        );

        let mut order = amendable_order();
        order.record_status(OrderStatus::Delivered, Utc::now());
        assert_matches!(
            merge_additional_items(&mut order, &[new_item("p1", None, 1)]),
            Err(ServiceError::NotAmendable(_))
        );
    }

    #[test]
    fn zero_quantity_is_a_validation_error() {
        let mut order = amendable_order();
        assert_matches!(
            merge_additional_items(&mut order, &[new_item("p1", None, 0)]),
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(order.line_items[0].quantity, 3);
    }
}
