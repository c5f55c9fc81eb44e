use crate::{
    entities::wallet_transaction,
    errors::ServiceError,
    handlers::CustomerId,
    ApiResponse, AppState, ListQuery,
};
use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct WalletView {
    pub balance: Decimal,
    pub transactions: Vec<wallet_transaction::Model>,
    pub total_transactions: u64,
}

/// GET /wallet — balance with paginated transaction history, newest first.
/// A customer who never held funds sees a zero balance and no history.
pub async fn get_wallet(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<WalletView>>, ServiceError> {
    let (balance, transactions, total_transactions) = state
        .services
        .wallet
        .get_wallet(customer_id, query.page, query.limit)
        .await?;

    Ok(Json(ApiResponse::success(WalletView {
        balance,
        transactions,
        total_transactions,
    })))
}
