use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Post-fulfillment return request over a subset of an order's line items.
///
/// `refund_amount` is computed once at request time from the purchase prices
/// and never recomputed. The transition to `completed` performs exactly one
/// wallet credit; re-entering `completed` is a no-op.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(table_name = "return_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub reason: String,
    pub status: ReturnStatus,
    pub refund_status: RefundStatus,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub refund_amount: Decimal,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(has_many = "super::return_item::Entity")]
    ReturnItems,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::return_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReturnStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl ReturnStatus {
    pub fn can_transition(self, to: ReturnStatus) -> bool {
        use ReturnStatus::*;
        match (self, to) {
            (Pending, Approved) | (Pending, Rejected) => true,
            (Approved, Completed) => true,
            // Direct completion of a pending return is a vendor shortcut.
            (Pending, Completed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReturnStatus::Rejected | ReturnStatus::Completed)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Refund authorized but not yet paid out
    #[sea_orm(string_value = "processed")]
    Processed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "completed")]
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_lifecycle_is_one_way() {
        assert!(ReturnStatus::Pending.can_transition(ReturnStatus::Approved));
        assert!(ReturnStatus::Approved.can_transition(ReturnStatus::Completed));
        assert!(ReturnStatus::Pending.can_transition(ReturnStatus::Rejected));
        assert!(!ReturnStatus::Rejected.can_transition(ReturnStatus::Approved));
        assert!(!ReturnStatus::Completed.can_transition(ReturnStatus::Completed));
        assert!(ReturnStatus::Completed.is_terminal());
    }
}
