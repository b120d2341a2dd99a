use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ensure_identity_unchanged, order_not_found, OrderMutation, OrderRepository};
use crate::errors::ServiceError;
use crate::models::Order;

/// Process-local order store. Each order sits behind its own async mutex so
/// updates to one order are serialised while different orders proceed in
/// parallel.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<Uuid, Arc<Mutex<Order>>>,
    by_order_number: DashMap<String, Uuid>,
    by_bill_reference: DashMap<String, Uuid>,
    sequence: Mutex<Option<u64>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: Uuid) -> Result<Arc<Mutex<Order>>, ServiceError> {
        self.orders
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| order_not_found(id))
    }

    fn reindex_bill_reference(&self, id: Uuid, previous: Option<&str>, current: Option<&str>) {
        if previous == current {
            return;
        }
        if let Some(old) = previous {
            self.by_bill_reference.remove_if(old, |_, owner| *owner == id);
        }
        if let Some(new) = current {
            self.by_bill_reference.insert(new.to_string(), id);
        }
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: Order) -> Result<Uuid, ServiceError> {
        let id = order.id;
        match self.by_order_number.entry(order.order_number.clone()) {
            Entry::Occupied(_) => {
                return Err(ServiceError::Conflict(format!(
                    "order number {} already exists",
                    order.order_number
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        if let Some(reference) = &order.gateway_bill_reference {
            self.by_bill_reference.insert(reference.clone(), id);
        }
        self.orders.insert(id, Arc::new(Mutex::new(order)));
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Order, ServiceError> {
        let slot = self.slot(id)?;
        let order = slot.lock().await;
        Ok(order.clone())
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Order, ServiceError> {
        let id = self
            .by_order_number
            .get(order_number)
            .map(|entry| *entry.value())
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
        self.get(id).await
    }

    async fn find_by_gateway_bill_reference(
        &self,
        reference: &str,
    ) -> Result<Order, ServiceError> {
        let id = self
            .by_bill_reference
            .get(reference)
            .map(|entry| *entry.value())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order carries bill reference {}", reference))
            })?;
        self.get(id).await
    }

    async fn transactional_update(
        &self,
        id: Uuid,
        apply: OrderMutation<'_>,
    ) -> Result<Order, ServiceError> {
        let slot = self.slot(id)?;
        let mut stored = slot.lock().await;
        // Deleted while we were waiting for the lock.
        if !self.orders.contains_key(&id) {
            return Err(order_not_found(id));
        }

        let mut draft = stored.clone();
        if !apply(&mut draft)? {
            return Ok(stored.clone());
        }
        ensure_identity_unchanged(&stored, &draft)?;

        draft.updated_at = Utc::now();
        self.reindex_bill_reference(
            id,
            stored.gateway_bill_reference.as_deref(),
            draft.gateway_bill_reference.as_deref(),
        );
        *stored = draft;
        Ok(stored.clone())
    }

    async fn count(&self) -> Result<u64, ServiceError> {
        Ok(self.orders.len() as u64)
    }

    async fn next_sequence(&self) -> Result<u64, ServiceError> {
        let mut sequence = self.sequence.lock().await;
        let next = match *sequence {
            Some(current) => current + 1,
            None => self.count().await? + 1,
        };
        *sequence = Some(next);
        Ok(next)
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<Order>, ServiceError> {
        let slots: Vec<_> = self
            .orders
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut orders = Vec::with_capacity(slots.len());
        for slot in slots {
            orders.push(slot.lock().await.clone());
        }
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_number.cmp(&a.order_number))
        });
        Ok(orders
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let (_, slot) = self.orders.remove(&id).ok_or_else(|| order_not_found(id))?;
        let order = slot.lock().await;
        self.by_order_number.remove(&order.order_number);
        if let Some(reference) = &order.gateway_bill_reference {
            self.by_bill_reference.remove_if(reference, |_, owner| *owner == id);
        }
        Ok(())
    }
}
