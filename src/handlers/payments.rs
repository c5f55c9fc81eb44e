use crate::{
    errors::ServiceError,
    services::payments::{GatewayCallback, SettlementOutcome},
    ApiResponse, AppState,
};
use axum::{extract::State, Json};
use validator::Validate;

/// POST /payments/verify — phase 2 of the gateway flow. A signature mismatch
/// flips the order back to failed/pending and surfaces as 400.
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<GatewayCallback>,
) -> Result<Json<ApiResponse<SettlementOutcome>>, ServiceError> {
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Invalid input: {e}")))?;

    let outcome = state.services.payments.verify_payment(payload).await?;
    Ok(Json(ApiResponse::success(outcome)))
}
