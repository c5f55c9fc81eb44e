use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity, ItemStatus},
        return_item,
        return_request::{self, RefundStatus, ReturnStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReturnLine {
    pub order_item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Opens a return request over a subset of a shipped or completed order.
///
/// The refund amount is computed once, from purchase prices, and frozen on
/// the request. Each line's cumulative `returned_quantity` is bumped in the
/// same transaction with a quantity-remaining guard, so two overlapping
/// requests can never cover more units than were purchased.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateReturnCommand {
    pub customer_id: Uuid,
    #[validate(length(min = 1))]
    pub order_number: String,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<ReturnLine>,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateReturnResult {
    pub return_id: Uuid,
    pub status: ReturnStatus,
    pub refund_amount: Decimal,
}

#[async_trait]
impl Command for CreateReturnCommand {
    type Result = CreateReturnResult;

    #[instrument(skip(self, db_pool, event_sender), fields(order_number = %self.order_number))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(format!("Invalid input: {e}")))?;
        for line in &self.items {
            line.validate()
                .map_err(|e| ServiceError::ValidationError(format!("Invalid input: {e}")))?;
        }

        let header = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(self.order_number.clone()))
            .filter(order::Column::CustomerId.eq(self.customer_id))
            .one(&*db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("order {} not found", self.order_number))
            })?;

        if !matches!(header.status, OrderStatus::Shipped | OrderStatus::Completed) {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is {}, returns require a shipped or completed order",
                header.order_number, header.status
            )));
        }

        let order_items: HashMap<Uuid, order_item::Model> = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(header.id))
            .all(&*db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|i| (i.id, i))
            .collect();

        let mut refund_amount = Decimal::ZERO;
        for line in &self.items {
            let item = order_items.get(&line.order_item_id).ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "item {} does not belong to order {}",
                    line.order_item_id, header.order_number
                ))
            })?;
            if item.status == ItemStatus::Cancelled {
                return Err(ServiceError::InvalidOperation(format!(
                    "item {} was cancelled and is not returnable",
                    line.order_item_id
                )));
            }
            refund_amount += item.price_at_purchase * Decimal::from(line.quantity);
        }

        let txn = db_pool.begin().await.map_err(ServiceError::db_error)?;

        // The guard `returned_quantity + q <= quantity` rides each UPDATE, so
        // a concurrent request for the same units loses cleanly. Cancelled
        // lines are excluded here too; they were already refunded and
        // restocked, and a concurrent cancellation must not slip past the
        // status check above.
        for line in &self.items {
            let result = OrderItemEntity::update_many()
                .col_expr(
                    order_item::Column::ReturnedQuantity,
                    Expr::col(order_item::Column::ReturnedQuantity).add(line.quantity),
                )
                .col_expr(order_item::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                .filter(order_item::Column::Id.eq(line.order_item_id))
                .filter(order_item::Column::Status.ne(ItemStatus::Cancelled))
                .filter(
                    Expr::col(order_item::Column::ReturnedQuantity)
                        .lte(Expr::col(order_item::Column::Quantity).sub(line.quantity)),
                )
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;

            if result.rows_affected == 0 {
                return Err(ServiceError::ValidationError(format!(
                    "return quantity for item {} exceeds the remaining returnable quantity",
                    line.order_item_id
                )));
            }
        }

        let return_id = Uuid::new_v4();
        let request = return_request::ActiveModel {
            id: Set(return_id),
            order_id: Set(header.id),
            customer_id: Set(self.customer_id),
            reason: Set(self.reason.clone()),
            status: Set(ReturnStatus::Pending),
            refund_status: Set(RefundStatus::Pending),
            refund_amount: Set(refund_amount),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        let request = request.insert(&txn).await.map_err(ServiceError::db_error)?;

        for line in &self.items {
            let item = return_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                return_id: Set(return_id),
                order_item_id: Set(line.order_item_id),
                quantity: Set(line.quantity),
            };
            item.insert(&txn).await.map_err(ServiceError::db_error)?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        event_sender
            .send_logged(Event::ReturnRequested {
                return_id,
                order_id: header.id,
                refund_amount,
            })
            .await;
        info!(%return_id, order_number = %header.order_number, %refund_amount, "return requested");

        Ok(CreateReturnResult {
            return_id,
            status: request.status,
            refund_amount,
        })
    }
}
