use crate::{
    db::DbPool,
    entities::{
        customer_address::{self, AddressSnapshot, Entity as CustomerAddressEntity},
        order::{self, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity, ItemStatus},
    },
    errors::ServiceError,
    services::{
        cart::PricedCartLine,
        catalog,
        pricing::{self, CouponSnapshot},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A priced line with its platform/vendor money split resolved.
#[derive(Debug, Clone)]
pub struct AssembledLine {
    pub line: PricedCartLine,
    pub commission_amount: Decimal,
    pub vendor_earning: Decimal,
}

/// Fully priced order ready to be committed: header totals, coupon and
/// address snapshots, and per-line splits. Assembly is pure; nothing is
/// persisted until [`insert_order`] runs.
#[derive(Debug, Clone)]
pub struct AssembledOrder {
    pub customer_id: Uuid,
    pub lines: Vec<AssembledLine>,
    pub shipping_address: AddressSnapshot,
    pub coupon: Option<CouponSnapshot>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub total_commission: Decimal,
    pub total_vendor_earnings: Decimal,
}

/// Computes every money figure for an order from its priced snapshot.
///
/// Commission is split per line; header commission totals are sums of the
/// rounded line figures, and `total = subtotal − discount + tax`.
pub fn assemble_order(
    customer_id: Uuid,
    lines: Vec<PricedCartLine>,
    shipping_address: AddressSnapshot,
    coupon: Option<CouponSnapshot>,
    tax_rate: Decimal,
    commission_rate: Decimal,
) -> AssembledOrder {
    let totals = pricing::compute_totals(&lines, tax_rate);
    let discount_amount = coupon
        .as_ref()
        .map(|c| c.discount_amount)
        .unwrap_or_default();

    let lines: Vec<AssembledLine> = lines
        .into_iter()
        .map(|line| {
            let split = pricing::split_commission(line.line_total, commission_rate);
            AssembledLine {
                line,
                commission_amount: split.commission,
                vendor_earning: split.vendor_earning,
            }
        })
        .collect();

    let total_commission: Decimal = lines.iter().map(|l| l.commission_amount).sum();
    let total_vendor_earnings: Decimal = lines.iter().map(|l| l.vendor_earning).sum();

    AssembledOrder {
        customer_id,
        lines,
        shipping_address,
        coupon,
        subtotal: totals.subtotal,
        tax_amount: totals.tax,
        discount_amount,
        total_amount: totals.subtotal - discount_amount + totals.tax,
        total_commission,
        total_vendor_earnings,
    }
}

/// Initial payment/order state seeded per payment method at commit time.
#[derive(Debug, Clone)]
pub struct OrderSeed {
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub gateway_order_id: Option<String>,
}

/// Commits an assembled order inside the caller's transaction: decrements
/// stock for every line (conditionally, so an out-of-stock line rolls the
/// whole commit back) and inserts the header plus items.
pub async fn insert_order<C: ConnectionTrait>(
    conn: &C,
    assembled: &AssembledOrder,
    seed: OrderSeed,
) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
    for l in &assembled.lines {
        catalog::decrement_stock(conn, l.line.variant_id, l.line.quantity).await?;
    }

    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let order_number = format!("ORD-{}", &order_id.simple().to_string()[..8].to_uppercase());

    let header = order::ActiveModel {
        id: Set(order_id),
        order_number: Set(order_number),
        customer_id: Set(assembled.customer_id),
        status: Set(seed.order_status),
        payment_method: Set(seed.payment_method),
        payment_status: Set(seed.payment_status),
        subtotal: Set(assembled.subtotal),
        tax_amount: Set(assembled.tax_amount),
        discount_amount: Set(assembled.discount_amount),
        total_amount: Set(assembled.total_amount),
        total_commission: Set(assembled.total_commission),
        total_vendor_earnings: Set(assembled.total_vendor_earnings),
        coupon_code: Set(assembled.coupon.as_ref().map(|c| c.code.clone())),
        shipping_address: Set(serde_json::to_string(&assembled.shipping_address)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?),
        gateway_order_id: Set(seed.gateway_order_id.clone()),
        gateway_payment_id: Set(None),
        order_date: Set(now),
        created_at: Set(now),
        updated_at: Set(None),
        version: Set(1),
    };
    let header = header.insert(conn).await.map_err(ServiceError::db_error)?;

    let mut items = Vec::with_capacity(assembled.lines.len());
    for l in &assembled.lines {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(l.line.product_id),
            vendor_id: Set(l.line.vendor_id),
            variant_id: Set(l.line.variant_id),
            sku: Set(l.line.sku.clone()),
            name: Set(l.line.name.clone()),
            quantity: Set(l.line.quantity),
            price_at_purchase: Set(l.line.unit_price),
            line_total: Set(l.line.line_total),
            commission_amount: Set(l.commission_amount),
            vendor_earning: Set(l.vendor_earning),
            status: Set(ItemStatus::Processing),
            returned_quantity: Set(0),
            created_at: Set(now),
            updated_at: Set(None),
        };
        items.push(item.insert(conn).await.map_err(ServiceError::db_error)?);
    }

    Ok((header, items))
}

/// Version-guarded order status transition. Zero rows affected means another
/// request moved the header first: `ConcurrencyConflict`.
pub async fn transition_status<C: ConnectionTrait>(
    conn: &C,
    header: &order::Model,
    new_status: OrderStatus,
) -> Result<(), ServiceError> {
    if !header.status.can_transition(new_status) {
        return Err(ServiceError::InvalidOperation(format!(
            "order {} cannot move from {} to {}",
            header.order_number, header.status, new_status
        )));
    }

    let result = OrderEntity::update_many()
        .col_expr(order::Column::Status, Expr::value(new_status))
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

/// Order aggregate read/transition service.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Resolves an address-book reference, enforcing ownership.
    #[instrument(skip(self))]
    pub async fn resolve_address(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
    ) -> Result<AddressSnapshot, ServiceError> {
        let address = CustomerAddressEntity::find_by_id(address_id)
            .filter(customer_address::Column::CustomerId.eq(customer_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                warn!(%address_id, %customer_id, "address not in customer's address book");
                ServiceError::NotFound(format!("address {address_id} not found"))
            })?;

        Ok(AddressSnapshot::from(address))
    }

    /// Fetches one order (scoped to its owner) with its line items.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        customer_id: Uuid,
        order_number: &str,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let header = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_number} not found")))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(header.id))
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((header, items))
    }

    /// Paginated order history for one customer, newest first, items included.
    #[instrument(skip(self))]
    pub async fn get_order_history(
        &self,
        customer_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<(order::Model, Vec<order_item::Model>)>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let headers = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        let order_ids: Vec<Uuid> = headers.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        if !order_ids.is_empty() {
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.is_in(order_ids))
                .all(&*self.db_pool)
                .await
                .map_err(ServiceError::db_error)?;
            for item in items {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        let orders = headers
            .into_iter()
            .map(|h| {
                let items = items_by_order.remove(&h.id).unwrap_or_default();
                (h, items)
            })
            .collect();

        Ok((orders, total))
    }

    /// Moves an order along the fulfillment chain (processing → shipped →
    /// completed), keeping item states in step.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let header = OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        transition_status(&*self.db_pool, &header, new_status).await?;

        let item_status = match new_status {
            OrderStatus::Shipped => Some(ItemStatus::Shipped),
            OrderStatus::Completed => Some(ItemStatus::Completed),
            _ => None,
        };
        if let Some(item_status) = item_status {
            OrderItemEntity::update_many()
                .col_expr(order_item::Column::Status, Expr::value(item_status))
                .col_expr(order_item::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                .filter(order_item::Column::OrderId.eq(order_id))
                .filter(order_item::Column::Status.ne(ItemStatus::Cancelled))
                .exec(&*self.db_pool)
                .await
                .map_err(ServiceError::db_error)?;
        }

        info!(%order_id, status = %new_status, "order status updated");

        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot_line(unit: Decimal, qty: i32) -> PricedCartLine {
        PricedCartLine {
            product_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            sku: "SKU".into(),
            name: "Thing".into(),
            quantity: qty,
            unit_price: unit,
            line_total: unit * Decimal::from(qty),
        }
    }

    fn address() -> AddressSnapshot {
        AddressSnapshot {
            recipient_name: "A Customer".into(),
            line1: "1 Market St".into(),
            line2: None,
            city: "Pune".into(),
            state: "MH".into(),
            postal_code: "411001".into(),
            country: "IN".into(),
            phone: None,
        }
    }

    #[test]
    fn assembled_totals_satisfy_header_invariant() {
        // total == Σ line_total − discount + tax
        let lines = vec![snapshot_line(dec!(400), 1), snapshot_line(dec!(300), 2)];
        let coupon = CouponSnapshot {
            code: "SAVE10".into(),
            discount_amount: dec!(100),
        };
        let assembled = assemble_order(
            Uuid::new_v4(),
            lines,
            address(),
            Some(coupon),
            dec!(0.18),
            dec!(0.10),
        );

        assert_eq!(assembled.subtotal, dec!(1000));
        assert_eq!(assembled.tax_amount, dec!(180.00));
        assert_eq!(assembled.discount_amount, dec!(100));
        assert_eq!(
            assembled.total_amount,
            assembled.subtotal - assembled.discount_amount + assembled.tax_amount
        );
    }

    #[test]
    fn line_splits_are_exact_complements() {
        let lines = vec![snapshot_line(dec!(33.33), 3), snapshot_line(dec!(0.01), 1)];
        let assembled = assemble_order(
            Uuid::new_v4(),
            lines,
            address(),
            None,
            dec!(0.18),
            dec!(0.10),
        );

        for l in &assembled.lines {
            assert_eq!(l.commission_amount + l.vendor_earning, l.line.line_total);
        }
        let commission_sum: Decimal = assembled.lines.iter().map(|l| l.commission_amount).sum();
        let earning_sum: Decimal = assembled.lines.iter().map(|l| l.vendor_earning).sum();
        assert_eq!(assembled.total_commission, commission_sum);
        assert_eq!(assembled.total_vendor_earnings, earning_sum);
        assert_eq!(commission_sum + earning_sum, assembled.subtotal);
    }
}
