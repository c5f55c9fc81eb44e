use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        cart::CartService,
        catalog::CatalogService,
        orders::OrderService,
        payments::{PaymentGateway, PaymentService},
        pricing::PricingService,
        returns::ReturnService,
        wallet::WalletService,
    },
};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use uuid::Uuid;

pub mod cart;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod payments;
pub mod returns;
pub mod wallet;

/// Service registry shared across handlers.
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub catalog: Arc<CatalogService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub pricing: Arc<PricingService>,
    pub returns: Arc<ReturnService>,
    pub wallet: Arc<WalletService>,
}

/// Wires every service against one pool, event channel, and gateway client.
pub fn build_services(
    db: Arc<DbPool>,
    event_sender: EventSender,
    config: &AppConfig,
    gateway: Arc<dyn PaymentGateway>,
) -> AppServices {
    let cart = Arc::new(CartService::new(db.clone()));
    let catalog = Arc::new(CatalogService::new(db.clone()));
    let orders = Arc::new(OrderService::new(db.clone()));
    let pricing = Arc::new(PricingService::new(
        db.clone(),
        config.tax_rate,
        config.commission_rate,
    ));
    let payments = Arc::new(PaymentService::new(
        db.clone(),
        event_sender.clone(),
        cart.clone(),
        orders.clone(),
        pricing.clone(),
        gateway,
        config.gateway.key_secret.clone(),
        config.gateway.currency.clone(),
    ));
    let returns = Arc::new(ReturnService::new(db.clone()));
    let wallet = Arc::new(WalletService::new(db, event_sender));

    AppServices {
        cart,
        catalog,
        orders,
        payments,
        pricing,
        returns,
        wallet,
    }
}

/// Actor identity extracted from the `X-Customer-Id` header. Session and
/// token handling live in an adapter outside this core; by the time a request
/// reaches these handlers identity is an explicit value, never ambient state.
#[derive(Debug, Clone, Copy)]
pub struct CustomerId(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CustomerId {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-customer-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::ValidationError("missing X-Customer-Id header".to_string())
            })?;

        Uuid::parse_str(raw).map(CustomerId).map_err(|_| {
            ServiceError::ValidationError("X-Customer-Id must be a UUID".to_string())
        })
    }
}
