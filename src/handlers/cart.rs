use crate::{
    entities::cart_item,
    errors::ServiceError,
    handlers::CustomerId,
    ApiResponse, ApiResult, AppState,
};
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
}

/// GET /cart — stored cart lines, unvalidated.
pub async fn get_cart(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
) -> ApiResult<Vec<cart_item::Model>> {
    let items = state.services.cart.get_items(customer_id).await?;
    Ok(Json(ApiResponse::success(items)))
}

/// POST /cart/items — add or top up a variant.
pub async fn add_item(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Json(payload): Json<AddCartItemRequest>,
) -> ApiResult<cart_item::Model> {
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Invalid input: {e}")))?;

    let item = state
        .services
        .cart
        .add_item(
            customer_id,
            payload.product_id,
            payload.variant_id,
            payload.quantity,
        )
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

/// DELETE /cart — empty the cart.
pub async fn clear_cart(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
) -> Result<StatusCode, ServiceError> {
    state.services.cart.clear_cart(customer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
