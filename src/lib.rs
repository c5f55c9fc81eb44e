//! Marketplace settlement core: order placement, payment settlement
//! (cash-on-delivery, wallet, external gateway), the wallet ledger, the
//! vendor commission split, and post-sale cancellation/return processing.

pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use axum::{routing::get, routing::post, Json, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Common query parameters for list endpoints.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Standard response envelope.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// All routes of the settlement core under one version prefix.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/checkout/preview", post(handlers::checkout::preview))
        .route("/payments/verify", post(handlers::payments::verify_payment))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:order_number", get(handlers::orders::get_order))
        .route(
            "/orders/:order_number/cancel",
            post(handlers::orders::cancel_order),
        )
        .route(
            "/returns",
            get(handlers::returns::list_returns).post(handlers::returns::create_return),
        )
        .route("/returns/:id", get(handlers::returns::get_return))
        .route(
            "/returns/:id/status",
            post(handlers::returns::update_return_status),
        )
        .route("/wallet", get(handlers::wallet::get_wallet))
        .route(
            "/cart",
            get(handlers::cart::get_cart).delete(handlers::cart::clear_cart),
        )
        .route("/cart/items", post(handlers::cart::add_item))
}

/// Builds the full application router with the shared state applied.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginated_response_computes_page_count() {
        let page: PaginatedResponse<u32> = PaginatedResponse::new(vec![1, 2, 3], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty: PaginatedResponse<u32> = PaginatedResponse::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn envelope_marks_success_and_failure() {
        let ok = ApiResponse::success(7);
        assert!(ok.success);
        assert_eq!(ok.data, Some(7));

        let err = ApiResponse::<()>::error("oops".into());
        assert!(!err.success);
        assert_eq!(err.message.as_deref(), Some("oops"));
    }
}
