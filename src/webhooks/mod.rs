//! Inbound notifications from the payment gateway.
pub mod gateway_callback;
pub mod signature;

pub use gateway_callback::{redacted_payload, CallbackStatus, GatewayCallback};
pub use signature::{CallbackSigner, SignatureScheme};
