use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::services::pricing::OrderTotals;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Created,
    AwaitingPayment,
    Processing,
    PickedUp,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Statuses no admin transition may leave.
    pub fn is_final(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Statuses after which the item list is frozen.
    pub fn blocks_amendment(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Completed | OrderStatus::Cancelled
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    OnlineBanking,
}

impl PaymentMethod {
    pub fn initial_status(self) -> OrderStatus {
        match self {
            PaymentMethod::CashOnDelivery => OrderStatus::Created,
            PaymentMethod::OnlineBanking => OrderStatus::AwaitingPayment,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    AwaitingPayment,
    PendingConfirmation,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemProvenance {
    #[default]
    Original,
    Added,
    Updated,
}

/// Buyer-facing message language.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ms,
    Zh,
}

/// Identity and contact details of the buyer, frozen at order time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuyerSnapshot {
    #[validate(length(min = 1, message = "buyer user id is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "business name is required"))]
    pub business_name: String,
    #[validate(length(min = 1, message = "contact name is required"))]
    pub contact_name: String,
    #[validate(length(min = 6, message = "a contact phone number is required"))]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, message = "delivery address is required"))]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub name: String,
    /// Product name keyed by language code (`en`, `ms`, `zh`).
    #[serde(default)]
    pub name_translations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub taxable: bool,
    #[serde(default)]
    pub provenance: ItemProvenance,
}

impl LineItem {
    /// Items sharing this key are the same product line.
    pub fn merge_key(&self) -> (&str, Option<&str>) {
        (self.product_id.as_str(), self.variant_id.as_deref())
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    pub fn display_name(&self, language: Language) -> &str {
        self.name_translations
            .get(language.as_ref())
            .map(String::as_str)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

/// A line item as submitted by the storefront, before provenance is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewLineItem {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub name_translations: BTreeMap<String, String>,
    #[serde(default)]
    pub unit: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub taxable: bool,
}

impl NewLineItem {
    pub fn into_line_item(self, provenance: ItemProvenance) -> LineItem {
        LineItem {
            product_id: self.product_id,
            variant_id: self.variant_id.filter(|v| !v.trim().is_empty()),
            name: self.name,
            name_translations: self.name_translations,
            unit: self.unit,
            quantity: self.quantity,
            unit_price: self.unit_price,
            taxable: self.taxable,
            provenance,
        }
    }
}

/// Largest accepted unit price. Keeps every line and order total far inside
/// `Decimal` range so totals arithmetic cannot overflow.
pub const MAX_UNIT_PRICE: Decimal = dec!(1000000);

/// Rejects empty carts, zero quantities, negative or oversized prices and
/// unnamed products.
pub fn validate_line_items(items: &[NewLineItem]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "at least one line item is required".into(),
        ));
    }
    for (index, item) in items.iter().enumerate() {
        if item.product_id.trim().is_empty() || item.name.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "line item {} needs a product id and name",
                index + 1
            )));
        }
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for {} must be at least 1",
                item.name
            )));
        }
        if item.unit_price.is_sign_negative() && !item.unit_price.is_zero() {
            return Err(ServiceError::ValidationError(format!(
                "unit price for {} cannot be negative",
                item.name
            )));
        }
        if item.unit_price > MAX_UNIT_PRICE {
            return Err(ServiceError::ValidationError(format!(
                "unit price for {} cannot exceed {}",
                item.name, MAX_UNIT_PRICE
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryVerification {
    pub completed: bool,
    /// 0.0 ..= 1.0
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EInvoice {
    pub invoice_number: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_url: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// The order aggregate. Every mutation after creation goes through
/// `OrderRepository::transactional_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub buyer: BuyerSnapshot,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status_history: Vec<StatusHistoryEntry>,
    pub is_amendable: bool,
    pub delivery_date: NaiveDate,
    pub delivery_time_slot: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub amount_paid: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_bill_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_bill_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    /// Bills already credited to `amount_paid`.
    #[serde(default)]
    pub settled_bill_references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_verification: Option<DeliveryVerification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_invoice: Option<EInvoice>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Moves the order to `status` and appends the matching history entry.
    pub fn record_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        self.status_history.push(StatusHistoryEntry {
            status,
            timestamp: at,
        });
    }

    pub fn apply_totals(&mut self, totals: OrderTotals) {
        self.subtotal = totals.subtotal;
        self.tax_amount = totals.tax_amount;
        self.total = totals.total;
    }

    /// Amount still owed on the order, never negative.
    pub fn outstanding_amount(&self) -> Decimal {
        (self.total - self.amount_paid).max(Decimal::ZERO)
    }

    pub fn is_history_consistent(&self) -> bool {
        self.status_history
            .last()
            .map(|entry| entry.status == self.status)
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::services::pricing::compute_totals;

    pub fn line(product_id: &str, quantity: u32, unit_price: Decimal, taxable: bool) -> LineItem {
        LineItem {
            product_id: product_id.to_string(),
            variant_id: None,
            name: format!("Product {product_id}"),
            name_translations: BTreeMap::new(),
            unit: Some("kg".to_string()),
            quantity,
            unit_price,
            taxable,
            provenance: ItemProvenance::Original,
        }
    }

    pub fn buyer() -> BuyerSnapshot {
        BuyerSnapshot {
            user_id: "buyer-1".to_string(),
            business_name: "Kedai Kopi Lim".to_string(),
            contact_name: "Lim Ah Kow".to_string(),
            phone: "012-345 6789".to_string(),
            email: Some("lim@example.com".to_string()),
            address: "12 Jalan Sultan, Kuala Lumpur".to_string(),
        }
    }

    pub fn order(order_number: &str, payment_method: PaymentMethod, items: Vec<LineItem>) -> Order {
        let now = Utc::now();
        let status = payment_method.initial_status();
        let totals = compute_totals(&items);
        Order {
            id: Uuid::new_v4(),
            order_number: order_number.to_string(),
            buyer: buyer(),
            line_items: items,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            total: totals.total,
            status,
            payment_method,
            payment_status: PaymentStatus::AwaitingPayment,
            status_history: vec![StatusHistoryEntry {
                status,
                timestamp: now,
            }],
            is_amendable: false,
            delivery_date: now.date_naive(),
            delivery_time_slot: "08:00-10:00".to_string(),
            language: Language::En,
            amount_paid: Decimal::ZERO,
            gateway_bill_reference: None,
            gateway_bill_amount: None,
            payment_url: None,
            settled_bill_references: Vec::new(),
            delivery_verification: None,
            e_invoice: None,
            created_at: now,
            updated_at: now,
        }
    }
}
