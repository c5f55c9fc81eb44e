use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order header: the aggregate root for one checkout commitment.
///
/// Money columns are order-level projections of the line items plus the
/// order-level tax and coupon discount. The `version` column guards every
/// header mutation (optimistic locking) so concurrent partial cancellations
/// cannot clobber each other's totals.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Externally-facing opaque order identifier (`ORD-XXXXXXXX`)
    #[sea_orm(unique)]
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub tax_amount: Decimal,
    /// Coupon discount captured at commit time; zero when no coupon applied
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub discount_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub total_commission: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub total_vendor_earnings: Decimal,
    /// Coupon code snapshot; never re-derived from the live coupon
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    /// Shipping address snapshot serialized as JSON at commit time
    pub shipping_address: String,
    /// Gateway intent id, present only for gateway orders
    #[sea_orm(nullable)]
    pub gateway_order_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_payment_id: Option<String>,
    pub order_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::return_request::Entity")]
    ReturnRequests,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::return_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnRequests.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order-level aggregate state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl OrderStatus {
    /// Transition table for the order aggregate. `Cancelled` is reachable
    /// from every non-terminal state; `Failed` only from `Processing` and
    /// `Pending` (payment failure before capture).
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (Pending, Processing) | (Processing, Shipped) | (Shipped, Completed) => true,
            (Pending | Processing, Failed) => true,
            (from, Cancelled) => !matches!(from, Completed | Cancelled),
            // Gateway retry path: a failed order may be re-armed for capture.
            (Failed, Pending) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// How the customer chose to pay. Immutable after order creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cash_on_delivery")]
    CashOnDelivery,
    #[sea_orm(string_value = "wallet")]
    Wallet,
    #[sea_orm(string_value = "gateway")]
    Gateway,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl PaymentStatus {
    /// Payment state is monotonic except for the explicit gateway retry loop
    /// (`Failed → Failed` on a fresh attempt, `Failed → Paid` on capture).
    pub fn can_transition(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, to) {
            (Pending, Paid) | (Pending, Failed) => true,
            (Failed, Paid) | (Failed, Failed) => true,
            (Paid, _) => false,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_follows_fulfillment_chain() {
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition(OrderStatus::Completed));
        assert!(!OrderStatus::Pending.can_transition(OrderStatus::Shipped));
        assert!(!OrderStatus::Completed.can_transition(OrderStatus::Processing));
    }

    #[test]
    fn cancellation_reachable_from_active_states_only() {
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Cancelled));
        assert!(OrderStatus::Processing.can_transition(OrderStatus::Cancelled));
        assert!(OrderStatus::Shipped.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Completed.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition(OrderStatus::Cancelled));
    }

    #[test]
    fn payment_status_never_moves_backward_from_paid() {
        assert!(PaymentStatus::Pending.can_transition(PaymentStatus::Paid));
        assert!(PaymentStatus::Failed.can_transition(PaymentStatus::Paid));
        assert!(!PaymentStatus::Paid.can_transition(PaymentStatus::Pending));
        assert!(!PaymentStatus::Paid.can_transition(PaymentStatus::Failed));
    }

    #[test]
    fn gateway_retry_rearms_failed_orders() {
        assert!(OrderStatus::Failed.can_transition(OrderStatus::Pending));
        assert!(PaymentStatus::Failed.can_transition(PaymentStatus::Failed));
    }
}
