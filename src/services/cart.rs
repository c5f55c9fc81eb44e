use crate::{
    db::DbPool,
    entities::{
        cart::{self, Entity as CartEntity},
        cart_item::{self, Entity as CartItemEntity},
        product::{self, Entity as ProductEntity},
        product_variant::{self, Entity as ProductVariantEntity},
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// One immutable, re-priced checkout line produced by snapshot validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedCartLine {
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub variant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Stored-cart maintenance plus the pre-checkout snapshot validator.
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Returns the customer's cart, creating an empty one if none exists.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, customer_id: Uuid) -> Result<cart::Model, ServiceError> {
        let existing = CartEntity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        if let Some(cart) = existing {
            return Ok(cart);
        }

        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        model.insert(&*self.db_pool).await.map_err(ServiceError::db_error)
    }

    /// Adds (or tops up) a variant in the customer's cart.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be positive".to_string(),
            ));
        }

        let cart = self.get_or_create_cart(customer_id).await?;

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        if let Some(item) = existing {
            let new_qty = item.quantity + quantity;
            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(new_qty);
            return active.update(&*self.db_pool).await.map_err(ServiceError::db_error);
        }

        let model = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(product_id),
            variant_id: Set(variant_id),
            quantity: Set(quantity),
            created_at: Set(Utc::now()),
        };
        model.insert(&*self.db_pool).await.map_err(ServiceError::db_error)
    }

    /// Current cart lines (unvalidated, as stored).
    pub async fn get_items(&self, customer_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        let cart = self.get_or_create_cart(customer_id).await?;
        cart.find_related(CartItemEntity)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Empties the customer's cart. Called only after the order is durably
    /// persisted (immediately for wallet/COD, after verification for gateway).
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let cart = CartEntity::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;

        if let Some(cart) = cart {
            CartItemEntity::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(&*self.db_pool)
                .await
                .map_err(ServiceError::db_error)?;
        }
        Ok(())
    }

    /// Re-validates the stored cart against live catalog state and produces
    /// the immutable priced line list that checkout commits from.
    ///
    /// Lines referencing unlisted, unapproved or missing products, missing
    /// variants, or variants with insufficient stock are silently dropped;
    /// checkout proceeds with whatever survives. Non-positive stored
    /// quantities are clamped to 1. An empty result rejects checkout.
    #[instrument(skip(self))]
    pub async fn build_snapshot(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<PricedCartLine>, ServiceError> {
        let items = self.get_items(customer_id).await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation("cart is empty".to_string()));
        }

        let variant_ids: Vec<Uuid> = items.iter().map(|i| i.variant_id).collect();
        let variants: HashMap<Uuid, product_variant::Model> = ProductVariantEntity::find()
            .filter(product_variant::Column::Id.is_in(variant_ids))
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|v| (v.id, v))
            .collect();

        let product_ids: Vec<Uuid> = variants.values().map(|v| v.product_id).collect();
        let products: HashMap<Uuid, product::Model> = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let Some(variant) = variants.get(&item.variant_id) else {
                debug!(variant_id = %item.variant_id, "dropping cart line: variant missing");
                continue;
            };
            if variant.product_id != item.product_id {
                debug!(variant_id = %item.variant_id, "dropping cart line: product mismatch");
                continue;
            }
            let Some(product) = products.get(&variant.product_id) else {
                continue;
            };
            if !product.is_listed
                || product.approval_status != product::ApprovalStatus::Approved
            {
                debug!(product_id = %product.id, "dropping cart line: not sellable");
                continue;
            }

            let quantity = item.quantity.max(1);
            if variant.stock < quantity {
                debug!(variant_id = %variant.id, stock = variant.stock, quantity, "dropping cart line: insufficient stock");
                continue;
            }

            let unit_price = variant.effective_price();
            lines.push(PricedCartLine {
                product_id: product.id,
                vendor_id: product.vendor_id,
                variant_id: variant.id,
                sku: variant.sku.clone(),
                name: product.name.clone(),
                quantity,
                unit_price,
                line_total: unit_price * Decimal::from(quantity),
            });
        }

        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "cart is empty after validation".to_string(),
            ));
        }
        Ok(lines)
    }
}
