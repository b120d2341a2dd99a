use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::Order;

pub mod in_memory;
pub mod order_repository;

pub use in_memory::InMemoryOrderRepository;
pub use order_repository::SeaOrmOrderRepository;

/// Read-modify-write callback for [`OrderRepository::transactional_update`].
///
/// The callback receives a working copy of the stored order. Returning
/// `Ok(true)` persists the copy, `Ok(false)` discards it, and an error aborts
/// without writing. It may run more than once when a concurrent writer wins
/// the race, so it must derive everything from the order it is handed.
pub type OrderMutation<'a> =
    &'a mut (dyn FnMut(&mut Order) -> Result<bool, ServiceError> + Send);

/// Storage contract for the order aggregate.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts a new order. Fails with `Conflict` when the order number is taken.
    async fn create(&self, order: Order) -> Result<Uuid, ServiceError>;

    async fn get(&self, id: Uuid) -> Result<Order, ServiceError>;

    async fn find_by_order_number(&self, order_number: &str) -> Result<Order, ServiceError>;

    async fn find_by_gateway_bill_reference(&self, reference: &str)
        -> Result<Order, ServiceError>;

    /// Serialised read-modify-write of one order. Returns the order as stored
    /// after the call, whether or not the callback chose to write.
    async fn transactional_update(
        &self,
        id: Uuid,
        apply: OrderMutation<'_>,
    ) -> Result<Order, ServiceError>;

    async fn count(&self) -> Result<u64, ServiceError>;

    /// Atomically advances the order-number sequence. The first call seeds the
    /// sequence from [`count`](Self::count).
    async fn next_sequence(&self) -> Result<u64, ServiceError>;

    /// Newest orders first.
    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<Order>, ServiceError>;

    async fn delete(&self, id: Uuid) -> Result<(), ServiceError>;
}

pub(crate) fn order_not_found(id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Order {} not found", id))
}

/// Rejects a write that tries to change fields fixed at creation.
pub(crate) fn ensure_identity_unchanged(before: &Order, after: &Order) -> Result<(), ServiceError> {
    if before.id != after.id || before.order_number != after.order_number {
        return Err(ServiceError::InternalError(format!(
            "attempted to change the identity of order {}",
            before.id
        )));
    }
    if after.status_history.len() < before.status_history.len() {
        return Err(ServiceError::InternalError(format!(
            "attempted to truncate the status history of order {}",
            before.id
        )));
    }
    Ok(())
}
