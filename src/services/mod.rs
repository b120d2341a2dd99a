// Pure calculations
pub mod order_numbers;
pub mod pricing;

// Order lifecycle
pub mod amendments;
pub mod billing;
pub mod order_lifecycle;
pub mod payment_reconciliation;

// Post-delivery AI flows
pub mod fulfillment;
