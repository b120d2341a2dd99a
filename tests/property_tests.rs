//! Property-based tests for pricing and order numbering.

use chrono::NaiveDate;
use produce_orders::models::{ItemProvenance, LineItem};
use produce_orders::services::order_numbers::OrderNumberGenerator;
use produce_orders::services::pricing::{compute_totals, round_for_display, to_minor_units, TAX_RATE};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn price_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000, 0u32..3).prop_map(|(minor, scale)| Decimal::new(minor, scale))
}

fn line_strategy() -> impl Strategy<Value = LineItem> {
    ("[a-z]{1,6}", 1u32..500, price_strategy(), any::<bool>()).prop_map(
        |(product_id, quantity, unit_price, taxable)| LineItem {
            name: format!("Produce {product_id}"),
            product_id,
            variant_id: None,
            name_translations: Default::default(),
            unit: Some("kg".into()),
            quantity,
            unit_price,
            taxable,
            provenance: ItemProvenance::Original,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn total_is_subtotal_plus_tax(items in prop::collection::vec(line_strategy(), 0..20)) {
        let totals = compute_totals(&items);
        prop_assert_eq!(totals.total, totals.subtotal + totals.tax_amount);
    }

    #[test]
    fn tax_applies_only_to_taxable_lines(items in prop::collection::vec(line_strategy(), 0..20)) {
        let totals = compute_totals(&items);
        let taxable: Decimal = items
            .iter()
            .filter(|item| item.taxable)
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();
        prop_assert_eq!(totals.tax_amount, taxable * TAX_RATE);
        prop_assert!(totals.tax_amount <= totals.subtotal * TAX_RATE);
        prop_assert!(totals.tax_amount >= Decimal::ZERO);
    }

    #[test]
    fn totals_do_not_depend_on_line_order(mut items in prop::collection::vec(line_strategy(), 0..20)) {
        let forward = compute_totals(&items);
        items.reverse();
        prop_assert_eq!(compute_totals(&items), forward);
    }

    #[test]
    fn minor_units_match_display_rounding(amount in price_strategy()) {
        let cents = to_minor_units(amount).unwrap();
        prop_assert_eq!(Decimal::from(cents), round_for_display(amount) * Decimal::ONE_HUNDRED);
    }

    #[test]
    fn order_numbers_keep_their_shape(sequence in 1u64..10_000, day in 0u32..365) {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(day as u64);
        let number = OrderNumberGenerator::format(sequence, date);
        prop_assert!(number.starts_with("PA"));
        prop_assert_eq!(number.len(), 12);
        prop_assert!(number.ends_with(&date.format("%d%m%y").to_string()));
        prop_assert_eq!(number[2..6].parse::<u64>().unwrap(), sequence);
    }
}

#[test]
fn negative_amounts_cannot_be_billed() {
    assert!(to_minor_units(Decimal::new(-1, 2)).is_err());
}
