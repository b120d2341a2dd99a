/*!
 * # Metrics
 *
 * Prometheus counters for the order core, registered in a crate-local
 * registry and rendered in text exposition format at `GET /metrics`.
 */

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("produce".into()), None)
        .expect("registry can be created");
    pub static ref ORDERS_PLACED: IntCounterVec = register_counter_vec(
        "orders_placed_total",
        "Orders successfully placed",
        &["payment_method"]
    );
    pub static ref STATUS_TRANSITIONS: IntCounterVec = register_counter_vec(
        "order_status_transitions_total",
        "Accepted order status transitions by target status",
        &["to"]
    );
    pub static ref PAYMENT_CALLBACKS: IntCounterVec = register_counter_vec(
        "payment_callbacks_total",
        "Gateway callbacks by reconciliation outcome",
        &["outcome"]
    );
    pub static ref AMENDMENTS: IntCounter = {
        let counter = IntCounter::new("order_amendments_total", "Committed order amendments")
            .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
    pub static ref NOTIFICATION_FAILURES: IntCounterVec = register_counter_vec(
        "notification_failures_total",
        "Messages that could not be delivered, by audience",
        &["audience"]
    );
}

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).expect("metric can be created");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric can be registered");
    counter
}

/// Forces registration so every series shows up on the first scrape.
pub fn init() {
    lazy_static::initialize(&ORDERS_PLACED);
    lazy_static::initialize(&STATUS_TRANSITIONS);
    lazy_static::initialize(&PAYMENT_CALLBACKS);
    lazy_static::initialize(&AMENDMENTS);
    lazy_static::initialize(&NOTIFICATION_FAILURES);
}

pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
