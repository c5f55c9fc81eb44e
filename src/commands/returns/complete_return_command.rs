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
    services::{catalog, wallet},
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Completes a return: restocks the returned units and credits the frozen
/// refund amount to the customer's wallet, exactly once.
///
/// The refund-status guard on the completing UPDATE makes replays no-ops: a
/// second completion finds `refund_status = completed` and touches neither
/// stock nor the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteReturnCommand {
    pub return_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CompleteReturnResult {
    pub return_id: Uuid,
    pub status: ReturnStatus,
    pub refund_status: RefundStatus,
    pub already_completed: bool,
}

#[async_trait]
impl Command for CompleteReturnCommand {
    type Result = CompleteReturnResult;

    #[instrument(skip(self, db_pool, event_sender), fields(return_id = %self.return_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        let request = ReturnRequestEntity::find_by_id(self.return_id)
            .one(&*db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("return {} not found", self.return_id))
            })?;

        if request.refund_status == RefundStatus::Completed {
            info!("return already completed, nothing to do");
            return Ok(CompleteReturnResult {
                return_id: self.return_id,
                status: request.status,
                refund_status: request.refund_status,
                already_completed: true,
            });
        }

        if !request.status.can_transition(ReturnStatus::Completed) {
            return Err(ServiceError::InvalidOperation(format!(
                "return {} cannot move from {} to completed",
                self.return_id, request.status
            )));
        }

        let txn = db_pool.begin().await.map_err(ServiceError::db_error)?;

        let claim = ReturnRequestEntity::update_many()
            .col_expr(
                return_request::Column::Status,
                Expr::value(ReturnStatus::Completed),
            )
            .col_expr(
                return_request::Column::RefundStatus,
                Expr::value(RefundStatus::Completed),
            )
            .col_expr(
                return_request::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(return_request::Column::Id.eq(self.return_id))
            .filter(return_request::Column::RefundStatus.ne(RefundStatus::Completed))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if claim.rows_affected == 0 {
            // Raced with another completion; that one owns the credit.
            return Ok(CompleteReturnResult {
                return_id: self.return_id,
                status: ReturnStatus::Completed,
                refund_status: RefundStatus::Completed,
                already_completed: true,
            });
        }

        let lines = ReturnItemEntity::find()
            .filter(return_item::Column::ReturnId.eq(self.return_id))
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let item_ids: Vec<Uuid> = lines.iter().map(|l| l.order_item_id).collect();
        let order_items: HashMap<Uuid, order_item::Model> = OrderItemEntity::find()
            .filter(order_item::Column::Id.is_in(item_ids))
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|i| (i.id, i))
            .collect();

        let mut restocked = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = order_items.get(&line.order_item_id).ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "order item {} referenced by return {} is missing",
                    line.order_item_id, self.return_id
                ))
            })?;
            catalog::increment_stock(&txn, item.variant_id, line.quantity).await?;
            restocked.push((item.variant_id, line.quantity));
        }

        let wallet_id = wallet::credit(
            &txn,
            request.customer_id,
            request.refund_amount,
            &format!("Refund for return {}", self.return_id),
            Some(request.order_id),
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        for (variant_id, quantity) in restocked {
            event_sender
                .send_logged(Event::StockRestored {
                    variant_id,
                    quantity,
                })
                .await;
        }
        event_sender
            .send_logged(Event::WalletCredited {
                wallet_id,
                amount: request.refund_amount,
            })
            .await;
        event_sender
            .send_logged(Event::ReturnCompleted {
                return_id: self.return_id,
                refund_amount: request.refund_amount,
            })
            .await;

        info!(refund_amount = %request.refund_amount, "return completed and refunded");

        Ok(CompleteReturnResult {
            return_id: self.return_id,
            status: ReturnStatus::Completed,
            refund_status: RefundStatus::Completed,
            already_completed: false,
        })
    }
}
