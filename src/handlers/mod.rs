pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use std::sync::Arc;

use crate::ai::{DeliveryVerifier, EInvoiceGenerator};
use crate::config::AppConfig;
use crate::notifications::{MessagingClient, NotificationDispatcher};
use crate::payments::PaymentGateway;
use crate::repositories::OrderRepository;
use crate::services::{
    amendments::AmendmentEngine, billing::BillingService, fulfillment::FulfillmentService,
    order_lifecycle::OrderLifecycleService, order_numbers::OrderNumberGenerator,
    payment_reconciliation::PaymentReconciler,
};
use crate::webhooks::CallbackSigner;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// External systems the services talk to, built once at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn OrderRepository>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub messaging: Arc<dyn MessagingClient>,
    pub delivery_verifier: Option<Arc<dyn DeliveryVerifier>>,
    pub e_invoicer: Option<Arc<dyn EInvoiceGenerator>>,
}

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub repository: Arc<dyn OrderRepository>,
    pub orders: Arc<OrderLifecycleService>,
    pub amendments: Arc<AmendmentEngine>,
    pub reconciler: Arc<PaymentReconciler>,
    pub fulfillment: Arc<FulfillmentService>,
}

impl AppServices {
    pub fn new(collaborators: Collaborators, config: &AppConfig) -> Self {
        let Collaborators {
            repository,
            gateway,
            messaging,
            delivery_verifier,
            e_invoicer,
        } = collaborators;

        let dispatcher =
            NotificationDispatcher::new(messaging, &config.messaging, config.admin_base_url.clone());
        let billing = BillingService::new(repository.clone(), gateway);
        let amendments = AmendmentEngine::new(repository.clone(), dispatcher.clone(), billing.clone());
        let numbers = OrderNumberGenerator::new(repository.clone(), config.business_offset());

        let signer = CallbackSigner::new(
            config.payment_gateway.signature_scheme,
            config.payment_gateway.secret_key.clone(),
        );
        let reconciler = PaymentReconciler::new(
            repository.clone(),
            signer,
            dispatcher.clone(),
            config.payment_gateway.ack_unknown_orders,
        );

        let fulfillment = FulfillmentService::new(
            repository.clone(),
            delivery_verifier,
            e_invoicer,
            &config.ai_flows,
            config.business_offset(),
        );

        let orders = OrderLifecycleService::new(
            repository.clone(),
            numbers,
            dispatcher,
            billing,
            amendments.clone(),
        );

        Self {
            repository,
            orders: Arc::new(orders),
            amendments: Arc::new(amendments),
            reconciler: Arc::new(reconciler),
            fulfillment: Arc::new(fulfillment),
        }
    }
}
