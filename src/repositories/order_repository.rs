use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ensure_identity_unchanged, order_not_found, OrderMutation, OrderRepository};
use crate::entities::{order, order_counter};
use crate::errors::ServiceError;
use crate::models::Order;

const ORDER_NUMBER_COUNTER: &str = "order_number";

/// Attempts before a contended update gives up with `ConcurrentModification`.
const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Orders stored as JSON documents with indexed lookup columns. Updates use
/// an optimistic `version` compare-and-swap and are retried on contention.
#[derive(Debug, Clone)]
pub struct SeaOrmOrderRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn decode(model: order::Model) -> Result<Order, ServiceError> {
        serde_json::from_value(model.document).map_err(|e| {
            ServiceError::SerializationError(format!("order {} document: {}", model.id, e))
        })
    }

    fn map_insert_error(err: DbErr, order_number: &str) -> ServiceError {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict(format!("order number {} already exists", order_number))
            }
            _ => ServiceError::DatabaseError(err),
        }
    }

    async fn find_one(
        &self,
        select: sea_orm::Select<order::Entity>,
        missing: impl FnOnce() -> ServiceError,
    ) -> Result<Order, ServiceError> {
        match select.one(self.db.as_ref()).await? {
            Some(model) => Self::decode(model),
            None => Err(missing()),
        }
    }
}

#[async_trait]
impl OrderRepository for SeaOrmOrderRepository {
    async fn create(&self, order: Order) -> Result<Uuid, ServiceError> {
        let document = serde_json::to_value(&order)?;
        let model = order::ActiveModel {
            id: Set(order.id),
            order_number: Set(order.order_number.clone()),
            gateway_bill_reference: Set(order.gateway_bill_reference.clone()),
            status: Set(order.status.to_string()),
            payment_status: Set(order.payment_status.to_string()),
            document: Set(document),
            version: Set(1),
            created_at: Set(order.created_at),
            updated_at: Set(order.updated_at),
        };
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| Self::map_insert_error(e, &order.order_number))?;
        Ok(order.id)
    }

    async fn get(&self, id: Uuid) -> Result<Order, ServiceError> {
        self.find_one(order::Entity::find_by_id(id), || order_not_found(id))
            .await
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Order, ServiceError> {
        self.find_one(
            order::Entity::find().filter(order::Column::OrderNumber.eq(order_number)),
            || ServiceError::NotFound(format!("Order {} not found", order_number)),
        )
        .await
    }

    async fn find_by_gateway_bill_reference(
        &self,
        reference: &str,
    ) -> Result<Order, ServiceError> {
        self.find_one(
            order::Entity::find().filter(order::Column::GatewayBillReference.eq(reference)),
            || ServiceError::NotFound(format!("No order carries bill reference {}", reference)),
        )
        .await
    }

    async fn transactional_update(
        &self,
        id: Uuid,
        apply: OrderMutation<'_>,
    ) -> Result<Order, ServiceError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let row = order::Entity::find_by_id(id)
                .one(self.db.as_ref())
                .await?
                .ok_or_else(|| order_not_found(id))?;
            let version = row.version;
            let current = Self::decode(row)?;

            let mut draft = current.clone();
            if !apply(&mut draft)? {
                return Ok(current);
            }
            ensure_identity_unchanged(&current, &draft)?;
            draft.updated_at = Utc::now();

            let txn = self.db.begin().await?;
            let result = order::Entity::update_many()
                .col_expr(
                    order::Column::GatewayBillReference,
                    Expr::value(draft.gateway_bill_reference.clone()),
                )
                .col_expr(order::Column::Status, Expr::value(draft.status.to_string()))
                .col_expr(
                    order::Column::PaymentStatus,
                    Expr::value(draft.payment_status.to_string()),
                )
                .col_expr(order::Column::Document, Expr::value(serde_json::to_value(&draft)?))
                .col_expr(order::Column::Version, Expr::value(version + 1))
                .col_expr(order::Column::UpdatedAt, Expr::value(draft.updated_at))
                .filter(order::Column::Id.eq(id))
                .filter(order::Column::Version.eq(version))
                .exec(&txn)
                .await?;

            if result.rows_affected == 1 {
                txn.commit().await?;
                return Ok(draft);
            }
            txn.rollback().await?;
            debug!(order_id = %id, attempt, "version moved underneath update, retrying");
        }

        warn!(order_id = %id, "giving up on contended order update");
        Err(ServiceError::ConcurrentModification(id))
    }

    async fn count(&self) -> Result<u64, ServiceError> {
        Ok(order::Entity::find().count(self.db.as_ref()).await?)
    }

    async fn next_sequence(&self) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await?;

        let bumped = order_counter::Entity::update_many()
            .col_expr(
                order_counter::Column::Value,
                Expr::col(order_counter::Column::Value).add(1),
            )
            .filter(order_counter::Column::Name.eq(ORDER_NUMBER_COUNTER))
            .exec(&txn)
            .await?;

        if bumped.rows_affected == 0 {
            let seed = order::Entity::find().count(&txn).await? as i64;
            let counter = order_counter::ActiveModel {
                name: Set(ORDER_NUMBER_COUNTER.to_string()),
                value: Set(seed + 1),
            };
            if let Err(err) = counter.insert(&txn).await {
                txn.rollback().await?;
                return match err.sql_err() {
                    // Another writer seeded the counter first.
                    Some(SqlErr::UniqueConstraintViolation(_)) => {
                        Err(ServiceError::Conflict("order counter seeded concurrently".into()))
                    }
                    _ => Err(err.into()),
                };
            }
        }

        let value = order_counter::Entity::find_by_id(ORDER_NUMBER_COUNTER.to_string())
            .one(&txn)
            .await?
            .map(|counter| counter.value)
            .ok_or_else(|| ServiceError::InternalError("order counter vanished".into()))?;
        txn.commit().await?;

        u64::try_from(value)
            .map_err(|_| ServiceError::InternalError(format!("order counter is negative: {value}")))
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Vec<Order>, ServiceError> {
        order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::OrderNumber)
            .offset(offset)
            .limit(limit)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = order::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(order_not_found(id));
        }
        Ok(())
    }
}
