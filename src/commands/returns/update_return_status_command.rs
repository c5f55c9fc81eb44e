use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        order_item::{self, Entity as OrderItemEntity},
        return_item::{self, Entity as ReturnItemEntity},
        return_request::{self, Entity as ReturnRequestEntity, RefundStatus, ReturnStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Approves or rejects a pending return (vendor/admin action).
///
/// Approval authorizes the refund (`refund_status = processed`) without
/// paying it out. Rejection marks the refund failed and releases the units
/// reserved on each order line, so the customer may file a fresh request.
/// Completion is a separate command since it moves money.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReturnStatusCommand {
    pub return_id: Uuid,
    pub new_status: ReturnStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UpdateReturnStatusResult {
    pub return_id: Uuid,
    pub status: ReturnStatus,
    pub refund_status: RefundStatus,
}

#[async_trait]
impl Command for UpdateReturnStatusCommand {
    type Result = UpdateReturnStatusResult;

    #[instrument(skip(self, db_pool, event_sender), fields(return_id = %self.return_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let refund_status = match self.new_status {
            ReturnStatus::Approved => RefundStatus::Processed,
            ReturnStatus::Rejected => RefundStatus::Failed,
            other => {
                return Err(ServiceError::InvalidOperation(format!(
                    "cannot set a return to {other} through a status update"
                )))
            }
        };

        let request = ReturnRequestEntity::find_by_id(self.return_id)
            .one(&*db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("return {} not found", self.return_id))
            })?;

        if !request.status.can_transition(self.new_status) {
            return Err(ServiceError::InvalidOperation(format!(
                "return {} cannot move from {} to {}",
                self.return_id, request.status, self.new_status
            )));
        }

        let txn = db_pool.begin().await.map_err(ServiceError::db_error)?;

        // Status guard: only one decision wins over a pending return.
        let result = ReturnRequestEntity::update_many()
            .col_expr(return_request::Column::Status, Expr::value(self.new_status))
            .col_expr(
                return_request::Column::RefundStatus,
                Expr::value(refund_status),
            )
            .col_expr(
                return_request::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(return_request::Column::Id.eq(self.return_id))
            .filter(return_request::Column::Status.eq(request.status))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrencyConflict(self.return_id));
        }

        if self.new_status == ReturnStatus::Rejected {
            release_reserved_quantities(&txn, self.return_id).await?;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        event_sender
            .send_logged(Event::ReturnStatusChanged {
                return_id: self.return_id,
                old_status: request.status.to_string(),
                new_status: self.new_status.to_string(),
            })
            .await;
        info!(status = %self.new_status, "return status updated");

        Ok(UpdateReturnStatusResult {
            return_id: self.return_id,
            status: self.new_status,
            refund_status,
        })
    }
}

/// Hands the rejected quantities back to their order lines so they count as
/// returnable again.
async fn release_reserved_quantities<C: ConnectionTrait>(
    conn: &C,
    return_id: Uuid,
) -> Result<(), ServiceError> {
    let lines = ReturnItemEntity::find()
        .filter(return_item::Column::ReturnId.eq(return_id))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    for line in lines {
        OrderItemEntity::update_many()
            .col_expr(
                order_item::Column::ReturnedQuantity,
                Expr::col(order_item::Column::ReturnedQuantity).sub(line.quantity),
            )
            .col_expr(order_item::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order_item::Column::Id.eq(line.order_item_id))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;
    }
    Ok(())
}
