pub mod order;

pub use order::{
    validate_line_items, BuyerSnapshot, DeliveryVerification, EInvoice, ItemProvenance, Language,
    LineItem, NewLineItem, Order, OrderStatus, PaymentMethod, PaymentStatus, StatusHistoryEntry,
};
