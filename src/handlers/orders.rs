use crate::{
    commands::orders::{CancelItemSelector, CancelOrderCommand, CancelOrderResult},
    commands::Command,
    entities::{order, order_item},
    errors::ServiceError,
    handlers::CustomerId,
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Order header plus its line items as returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    /// Omit to cancel every remaining item.
    pub items: Option<Vec<CancelItemSelector>>,
}

/// GET /orders — the customer's order history, newest first.
pub async fn list_orders(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderView>>>, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .get_order_history(customer_id, query.page, query.limit)
        .await?;

    let items = orders
        .into_iter()
        .map(|(order, items)| OrderView { order, items })
        .collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items,
        total,
        query.page,
        query.limit,
    ))))
}

/// GET /orders/:order_number
pub async fn get_order(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Path(order_number): Path<String>,
) -> ApiResult<OrderView> {
    let (order, items) = state
        .services
        .orders
        .get_order(customer_id, &order_number)
        .await?;
    Ok(Json(ApiResponse::success(OrderView { order, items })))
}

/// POST /orders/:order_number/cancel — cancel all or a subset of the order's
/// items; paid orders are refunded to the customer wallet.
pub async fn cancel_order(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Path(order_number): Path<String>,
    Json(payload): Json<CancelOrderRequest>,
) -> ApiResult<CancelOrderResult> {
    let command = CancelOrderCommand {
        customer_id,
        order_number,
        items: payload.items,
        tax_rate: state.config.tax_rate,
    };
    let result = command
        .execute(state.db.clone(), Arc::new(state.event_sender.clone()))
        .await?;
    Ok(Json(ApiResponse::success(result)))
}
