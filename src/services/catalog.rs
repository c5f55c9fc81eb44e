use crate::{
    db::DbPool,
    entities::{
        product::{self, Entity as ProductEntity},
        product_variant::{self, Entity as ProductVariantEntity},
    },
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// A catalog variant joined with the listing flags of its parent product.
#[derive(Debug, Clone)]
pub struct VariantView {
    pub variant: product_variant::Model,
    pub product: product::Model,
}

impl VariantView {
    /// Whether the variant may be sold right now.
    pub fn is_purchasable(&self) -> bool {
        self.product.is_listed
            && self.product.approval_status == product::ApprovalStatus::Approved
    }
}

/// Decrements available stock by `qty` as one conditional update.
///
/// The guard `stock >= qty` travels with the UPDATE itself, so two concurrent
/// checkouts racing for the last unit cannot both succeed; the loser sees
/// zero rows affected and gets `InsufficientStock`.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    qty: i32,
) -> Result<(), ServiceError> {
    let result = ProductVariantEntity::update_many()
        .col_expr(
            product_variant::Column::Stock,
            Expr::col(product_variant::Column::Stock).sub(qty),
        )
        .col_expr(
            product_variant::Column::UpdatedAt,
            Expr::value(Some(Utc::now())),
        )
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(product_variant::Column::Stock.gte(qty))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        warn!(%variant_id, qty, "stock decrement rejected");
        return Err(ServiceError::InsufficientStock(format!(
            "variant {variant_id} has fewer than {qty} units available"
        )));
    }
    Ok(())
}

/// Restores `qty` units of stock (cancellation or completed return).
pub async fn increment_stock<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    qty: i32,
) -> Result<(), ServiceError> {
    ProductVariantEntity::update_many()
        .col_expr(
            product_variant::Column::Stock,
            Expr::col(product_variant::Column::Stock).add(qty),
        )
        .col_expr(
            product_variant::Column::UpdatedAt,
            Expr::value(Some(Utc::now())),
        )
        .filter(product_variant::Column::Id.eq(variant_id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(())
}

/// Read side of the catalog consumed by the settlement core.
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Fetches a variant together with its parent product's listing flags.
    #[instrument(skip(self))]
    pub async fn get_variant(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
    ) -> Result<Option<VariantView>, ServiceError> {
        let variant = ProductVariantEntity::find_by_id(variant_id)
            .filter(product_variant::Column::ProductId.eq(product_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        let Some(variant) = variant else {
            return Ok(None);
        };

        let product = ProductEntity::find_by_id(variant.product_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(product.map(|product| VariantView { variant, product }))
    }

    pub async fn decrement_stock(&self, variant_id: Uuid, qty: i32) -> Result<(), ServiceError> {
        decrement_stock(&*self.db_pool, variant_id, qty).await
    }

    pub async fn increment_stock(&self, variant_id: Uuid, qty: i32) -> Result<(), ServiceError> {
        increment_stock(&*self.db_pool, variant_id, qty).await
    }
}
