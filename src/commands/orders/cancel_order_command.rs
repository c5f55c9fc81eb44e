use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity, ItemStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{catalog, pricing, wallet},
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Selects one order line for cancellation by its catalog identity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelItemSelector {
    pub product_id: Uuid,
    pub variant_id: Uuid,
}

/// Cancels part or all of a committed order.
///
/// Items already `cancelled` are skipped, so replaying the same cancellation
/// restocks and refunds nothing a second time. When every item ends up
/// cancelled the order itself moves to `cancelled`; otherwise the header
/// totals shrink by exactly the cancelled lines' contribution.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelOrderCommand {
    pub customer_id: Uuid,
    #[validate(length(min = 1))]
    pub order_number: String,
    /// `None` cancels every remaining cancellable item.
    pub items: Option<Vec<CancelItemSelector>>,
    /// Order-level tax rate used to recompute tax on the surviving subtotal.
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CancelOrderResult {
    pub order_number: String,
    pub order_status: OrderStatus,
    pub cancelled_items: usize,
    pub refunded_amount: Decimal,
    pub total_amount: Decimal,
}

#[async_trait]
impl Command for CancelOrderCommand {
    type Result = CancelOrderResult;

    #[instrument(skip(self, db_pool, event_sender), fields(order_number = %self.order_number))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(format!("Invalid input: {e}")))?;

        // Lost header races are retried once with fresh state, then surfaced.
        match self.attempt(&db_pool, &event_sender).await {
            Err(ServiceError::ConcurrencyConflict(id)) => {
                warn!(order_id = %id, "cancellation lost a header race, retrying");
                self.attempt(&db_pool, &event_sender).await
            }
            other => other,
        }
    }
}

struct CancelledTally {
    count: usize,
    line_total: Decimal,
    commission: Decimal,
    vendor_earning: Decimal,
    restocked: Vec<(Uuid, i32)>,
}

impl CancelOrderCommand {
    async fn attempt(
        &self,
        db_pool: &DbPool,
        event_sender: &EventSender,
    ) -> Result<CancelOrderResult, ServiceError> {
        let header = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(self.order_number.clone()))
            .filter(order::Column::CustomerId.eq(self.customer_id))
            .one(db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("order {} not found", self.order_number))
            })?;

        if header.status.is_terminal() {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is already {}",
                header.order_number, header.status
            )));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(header.id))
            .all(db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        let targets: Vec<&order_item::Model> = items
            .iter()
            .filter(|i| i.status.is_cancellable())
            .filter(|i| match &self.items {
                Some(selectors) => selectors
                    .iter()
                    .any(|s| s.product_id == i.product_id && s.variant_id == i.variant_id),
                None => true,
            })
            .collect();

        if targets.is_empty() {
            // Nothing left to do: replay of an already-applied cancellation.
            info!(order_number = %header.order_number, "cancellation is a no-op");
            return Ok(CancelOrderResult {
                order_number: header.order_number,
                order_status: header.status,
                cancelled_items: 0,
                refunded_amount: Decimal::ZERO,
                total_amount: header.total_amount,
            });
        }

        let txn = db_pool.begin().await.map_err(ServiceError::db_error)?;
        let tally = self.cancel_items(&txn, &targets).await?;

        let survivors = items
            .iter()
            .filter(|i| i.status != ItemStatus::Cancelled)
            .filter(|i| !targets.iter().any(|t| t.id == i.id))
            .count();
        let full_cancellation = survivors == 0;

        let (new_status, new_total) = if full_cancellation {
            self.mark_order_cancelled(&txn, &header).await?;
            (OrderStatus::Cancelled, header.total_amount)
        } else {
            let total = self.shrink_totals(&txn, &header, &tally).await?;
            (header.status, total)
        };

        // Funds already captured (wallet or verified gateway) flow back to the
        // customer's wallet; COD never captured anything.
        let refunded = if header.payment_status == PaymentStatus::Paid {
            wallet::credit(
                &txn,
                self.customer_id,
                tally.line_total,
                &format!("Refund for cancelled items of order {}", header.order_number),
                Some(header.id),
            )
            .await?;
            tally.line_total
        } else {
            Decimal::ZERO
        };

        txn.commit().await.map_err(ServiceError::db_error)?;

        for (variant_id, quantity) in &tally.restocked {
            event_sender
                .send_logged(Event::StockRestored {
                    variant_id: *variant_id,
                    quantity: *quantity,
                })
                .await;
        }
        event_sender
            .send_logged(Event::OrderCancelled {
                order_id: header.id,
                full: full_cancellation,
                refunded_amount: refunded,
            })
            .await;

        info!(
            order_number = %header.order_number,
            cancelled = tally.count,
            full = full_cancellation,
            %refunded,
            "order cancellation applied"
        );

        Ok(CancelOrderResult {
            order_number: header.order_number,
            order_status: new_status,
            cancelled_items: tally.count,
            refunded_amount: refunded,
            total_amount: new_total,
        })
    }

    /// Flips each target to `cancelled` with a per-item status guard and
    /// restocks it. A guard miss means another request cancelled the item
    /// first; it is skipped rather than restocked twice.
    async fn cancel_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        targets: &[&order_item::Model],
    ) -> Result<CancelledTally, ServiceError> {
        let mut tally = CancelledTally {
            count: 0,
            line_total: Decimal::ZERO,
            commission: Decimal::ZERO,
            vendor_earning: Decimal::ZERO,
            restocked: Vec::new(),
        };

        for item in targets {
            let result = OrderItemEntity::update_many()
                .col_expr(order_item::Column::Status, Expr::value(ItemStatus::Cancelled))
                .col_expr(order_item::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                .filter(order_item::Column::Id.eq(item.id))
                .filter(
                    order_item::Column::Status
                        .is_in([ItemStatus::Processing, ItemStatus::Shipped]),
                )
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?;

            if result.rows_affected == 0 {
                continue;
            }

            // Units already sent back through a return were restocked there.
            let restock_qty = item.quantity - item.returned_quantity;
            if restock_qty > 0 {
                catalog::increment_stock(conn, item.variant_id, restock_qty).await?;
                tally.restocked.push((item.variant_id, restock_qty));
            }

            tally.count += 1;
            tally.line_total += item.line_total;
            tally.commission += item.commission_amount;
            tally.vendor_earning += item.vendor_earning;
        }
        Ok(tally)
    }

    async fn mark_order_cancelled<C: ConnectionTrait>(
        &self,
        conn: &C,
        header: &order::Model,
    ) -> Result<(), ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(order::Column::Version, Expr::value(header.version + 1))
            .filter(order::Column::Id.eq(header.id))
            .filter(order::Column::Version.eq(header.version))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrencyConflict(header.id));
        }
        Ok(())
    }

    /// Subtracts the cancelled lines' contribution from the header totals.
    /// Tax is recomputed on the surviving subtotal; the coupon discount
    /// shrinks proportionally to the subtotal it was granted against.
    async fn shrink_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        header: &order::Model,
        tally: &CancelledTally,
    ) -> Result<Decimal, ServiceError> {
        let new_subtotal = header.subtotal - tally.line_total;
        let new_tax = pricing::round_money(new_subtotal * self.tax_rate);
        let new_discount = if header.subtotal > Decimal::ZERO {
            pricing::round_money(header.discount_amount * new_subtotal / header.subtotal)
        } else {
            Decimal::ZERO
        };
        let new_total = new_subtotal - new_discount + new_tax;

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Subtotal, Expr::value(new_subtotal))
            .col_expr(order::Column::TaxAmount, Expr::value(new_tax))
            .col_expr(order::Column::DiscountAmount, Expr::value(new_discount))
            .col_expr(order::Column::TotalAmount, Expr::value(new_total))
            .col_expr(
                order::Column::TotalCommission,
                Expr::value(header.total_commission - tally.commission),
            )
            .col_expr(
                order::Column::TotalVendorEarnings,
                Expr::value(header.total_vendor_earnings - tally.vendor_earning),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(order::Column::Version, Expr::value(header.version + 1))
            .filter(order::Column::Id.eq(header.id))
            .filter(order::Column::Version.eq(header.version))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrencyConflict(header.id));
        }
        Ok(new_total)
    }
}
