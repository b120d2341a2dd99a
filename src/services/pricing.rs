//! Subtotal, tax and total for a list of line items.
//!
//! Amounts are kept at full `Decimal` precision on the order; rounding to
//! two places happens only when an amount is shown to a person or sent to
//! the payment gateway.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::LineItem;

/// Flat sales and service tax applied to taxable lines.
pub const TAX_RATE: Decimal = dec!(0.06);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

pub fn compute_totals(items: &[LineItem]) -> OrderTotals {
    let (subtotal, taxable_base) =
        items
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(subtotal, taxable), item| {
                let line = item.line_total();
                let taxable = if item.taxable { taxable + line } else { taxable };
                (subtotal + line, taxable)
            });

    let tax_amount = taxable_base * TAX_RATE;
    OrderTotals {
        subtotal,
        tax_amount,
        total: subtotal + tax_amount,
    }
}

pub fn round_for_display(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts an amount to whole cents for the gateway.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.is_sign_negative() {
        return Err(ServiceError::ValidationError(format!(
            "cannot bill a negative amount ({amount})"
        )));
    }
    let cents = round_for_display(amount) * Decimal::ONE_HUNDRED;
    i64::try_from(cents.trunc())
        .map_err(|_| ServiceError::ValidationError(format!("amount {amount} is too large to bill")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemProvenance;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn line(price: Decimal, quantity: u32, taxable: bool) -> LineItem {
        LineItem {
            product_id: format!("p-{price}-{quantity}"),
            variant_id: None,
            name: "item".into(),
            name_translations: BTreeMap::new(),
            unit: None,
            quantity,
            unit_price: price,
            taxable,
            provenance: ItemProvenance::Original,
        }
    }

    #[test]
    fn mixed_cart_keeps_full_precision() {
        let totals = compute_totals(&[line(dec!(5.50), 5, false), line(dec!(7.20), 3, true)]);
        assert_eq!(totals.subtotal, dec!(49.10));
        assert_eq!(totals.tax_amount, dec!(1.296));
        assert_eq!(totals.total, dec!(50.396));
        assert_eq!(round_for_display(totals.total), dec!(50.40));
    }

    #[test]
    fn empty_cart_is_zero() {
        let totals = compute_totals(&[]);
        assert_eq!(totals.total, Decimal::ZERO);
    }

    #[rstest]
    #[case(dec!(50.396), 5040)]
    #[case(dec!(0.005), 1)]
    #[case(dec!(12), 1200)]
    #[case(dec!(0), 0)]
    fn minor_units_round_half_away_from_zero(#[case] amount: Decimal, #[case] cents: i64) {
        assert_eq!(to_minor_units(amount).unwrap(), cents);
    }

    #[test]
    fn negative_amounts_cannot_be_billed() {
        assert!(matches!(
            to_minor_units(dec!(-1)),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
