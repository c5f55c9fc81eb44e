use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One line item of an order, carrying its own sub-status and money split.
///
/// `commission_amount + vendor_earning == line_total` always holds: the
/// commission is rounded once and the vendor earning is the exact complement.
/// `returned_quantity` accumulates across return requests so a line can never
/// be refunded past its purchased quantity.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub variant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    /// Unit price captured at commit time (discounted price when one existed)
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub price_at_purchase: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub line_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub commission_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub vendor_earning: Decimal,
    pub status: ItemStatus,
    pub returned_quantity: i32,
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
    #[sea_orm(
        belongs_to = "super::product_variant::Entity",
        from = "Column::VariantId",
        to = "super::product_variant::Column::Id"
    )]
    Variant,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Per-item fulfillment state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, strum::Display, utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemStatus {
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl ItemStatus {
    pub fn can_transition(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, to) {
            (Processing, Shipped) | (Shipped, Completed) => true,
            (Processing | Shipped, Cancelled) => true,
            _ => false,
        }
    }

    /// Items in these states still count toward order totals and may be
    /// cancelled; `Cancelled` items are excluded from any recomputation.
    pub fn is_cancellable(self) -> bool {
        matches!(self, ItemStatus::Processing | ItemStatus::Shipped)
    }
}
