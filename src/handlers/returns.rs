use crate::{
    commands::returns::{
        CompleteReturnCommand, CompleteReturnResult, CreateReturnCommand, CreateReturnResult,
        ReturnLine, UpdateReturnStatusCommand,
    },
    commands::Command,
    entities::{return_item, return_request, return_request::ReturnStatus},
    errors::ServiceError,
    handlers::CustomerId,
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct ReturnView {
    #[serde(flatten)]
    pub request: return_request::Model,
    pub items: Vec<return_item::Model>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReturnRequest {
    pub order_number: String,
    pub reason: String,
    pub items: Vec<ReturnLine>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateReturnStatusRequest {
    pub status: ReturnStatus,
}

/// Either decision of a status update, serialized uniformly.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ReturnStatusOutcome {
    Updated {
        return_id: Uuid,
        status: ReturnStatus,
    },
    Completed(CompleteReturnResult),
}

/// POST /returns — open a return over a shipped or completed order.
pub async fn create_return(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Json(payload): Json<CreateReturnRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateReturnResult>>), ServiceError> {
    let command = CreateReturnCommand {
        customer_id,
        order_number: payload.order_number,
        items: payload.items,
        reason: payload.reason,
    };
    let result = command
        .execute(state.db.clone(), Arc::new(state.event_sender.clone()))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(result))))
}

/// GET /returns
pub async fn list_returns(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<ReturnView>>>, ServiceError> {
    let (returns, total) = state
        .services
        .returns
        .list_returns(customer_id, query.page, query.limit)
        .await?;

    let items = returns
        .into_iter()
        .map(|(request, items)| ReturnView { request, items })
        .collect();
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items,
        total,
        query.page,
        query.limit,
    ))))
}

/// GET /returns/:id
pub async fn get_return(
    State(state): State<AppState>,
    CustomerId(customer_id): CustomerId,
    Path(return_id): Path<Uuid>,
) -> ApiResult<ReturnView> {
    let (request, items) = state
        .services
        .returns
        .get_return(customer_id, return_id)
        .await?;
    Ok(Json(ApiResponse::success(ReturnView { request, items })))
}

/// POST /returns/:id/status — vendor/admin decision. Approval and rejection
/// are plain status flips; completion moves stock and money, so it runs
/// through its own command with the single-credit guarantee.
pub async fn update_return_status(
    State(state): State<AppState>,
    Path(return_id): Path<Uuid>,
    Json(payload): Json<UpdateReturnStatusRequest>,
) -> ApiResult<ReturnStatusOutcome> {
    let events = Arc::new(state.event_sender.clone());
    let outcome = match payload.status {
        ReturnStatus::Completed => {
            let result = CompleteReturnCommand { return_id }
                .execute(state.db.clone(), events)
                .await?;
            ReturnStatusOutcome::Completed(result)
        }
        new_status => {
            let result = UpdateReturnStatusCommand {
                return_id,
                new_status,
            }
            .execute(state.db.clone(), events)
            .await?;
            ReturnStatusOutcome::Updated {
                return_id: result.return_id,
                status: result.status,
            }
        }
    };
    Ok(Json(ApiResponse::success(outcome)))
}
