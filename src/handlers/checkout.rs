use crate::{
    entities::order::PaymentMethod,
    errors::ServiceError,
    handlers::CustomerId,
    services::{payments::SettlementOutcome, pricing::PricePreview},
    ApiResponse, AppState,
};
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    pub address_id: Uuid,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PreviewRequest {
    pub coupon_code: Option<String>,
}

/// POST /checkout — snapshot-validate the cart and settle through the chosen
/// payment method.
pub async fn checkout(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SettlementOutcome>>), ServiceError> {
    let outcome = state
        .services
        .payments
        .place_order(
            customer_id,
            payload.address_id,
            payload.payment_method,
            payload.coupon_code,
        )
        .await?;

    let status = match &outcome {
        SettlementOutcome::Committed { .. } => StatusCode::CREATED,
        SettlementOutcome::AwaitingGateway { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(ApiResponse::success(outcome))))
}

/// POST /checkout/preview — price the current cart (with an optional coupon)
/// without committing anything.
pub async fn preview(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Json(payload): Json<PreviewRequest>,
) -> Result<Json<ApiResponse<PricePreview>>, ServiceError> {
    let lines = state.services.cart.build_snapshot(customer_id).await?;
    let preview = state
        .services
        .pricing
        .preview(&lines, payload.coupon_code.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(preview)))
}
