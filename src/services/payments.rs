use crate::{
    config::GatewayConfig,
    db::DbPool,
    entities::order::{
        self, Entity as OrderEntity, OrderStatus, PaymentMethod, PaymentStatus,
    },
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartService,
        catalog,
        orders::{self, AssembledOrder, OrderSeed, OrderService},
        pricing::PricingService,
        wallet,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

type HmacSha256 = Hmac<Sha256>;

/// Computes the callback signature over `"{gateway_order_id}|{payment_id}"`
/// with the shared secret.
pub fn compute_signature(secret: &str, gateway_order_id: &str, payment_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{gateway_order_id}|{payment_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a gateway callback signature.
pub fn verify_signature(
    secret: &str,
    gateway_order_id: &str,
    payment_id: &str,
    provided: &str,
) -> Result<(), ServiceError> {
    let provided = hex::decode(provided).map_err(|_| ServiceError::SignatureMismatch)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{gateway_order_id}|{payment_id}").as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| ServiceError::SignatureMismatch)
}

/// External payment gateway seam: intent creation only. Signature
/// verification stays in this module since it never leaves the process.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<String, ServiceError>;
}

/// HTTP gateway client. A transport or non-2xx failure surfaces as
/// `ExternalServiceError`; nothing is persisted before the intent exists.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateIntentRequest<'a> {
    amount: Decimal,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateIntentResponse {
    id: String,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_intent(
        &self,
        amount: Decimal,
        currency: &str,
        receipt: &str,
    ) -> Result<String, ServiceError> {
        let url = format!("{}/orders", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&CreateIntentRequest {
                amount,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway rejected intent creation: {}",
                response.status()
            )));
        }

        let body: CreateIntentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("bad gateway response: {e}")))?;
        Ok(body.id)
    }
}

/// Result of settling one checkout.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Order committed; for COD capture happens out of band.
    Committed {
        order_number: String,
        payment_status: PaymentStatus,
        total_amount: Decimal,
    },
    /// Gateway two-phase flow: intent created, awaiting callback verification.
    AwaitingGateway {
        order_number: String,
        gateway_order_id: String,
        total_amount: Decimal,
        currency: String,
    },
}

/// Gateway callback payload submitted to the verify endpoint.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct GatewayCallback {
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
    #[validate(length(min = 1))]
    pub gateway_payment_id: String,
    #[validate(length(min = 1))]
    pub signature: String,
}

/// One settlement strategy per payment method. Adding a method means adding
/// a handler, not editing existing branches.
#[async_trait]
trait SettlementHandler: Send + Sync {
    async fn settle(
        &self,
        svc: &PaymentService,
        customer_id: Uuid,
        assembled: AssembledOrder,
    ) -> Result<SettlementOutcome, ServiceError>;
}

struct CodSettlement;
struct WalletSettlement;
struct GatewaySettlement;

#[async_trait]
impl SettlementHandler for CodSettlement {
    async fn settle(
        &self,
        svc: &PaymentService,
        customer_id: Uuid,
        assembled: AssembledOrder,
    ) -> Result<SettlementOutcome, ServiceError> {
        let txn = svc.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let (header, _items) = orders::insert_order(
            &txn,
            &assembled,
            OrderSeed {
                payment_method: PaymentMethod::CashOnDelivery,
                payment_status: PaymentStatus::Pending,
                order_status: OrderStatus::Processing,
                gateway_order_id: None,
            },
        )
        .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        svc.cart_service.clear_cart(customer_id).await?;
        svc.event_sender
            .send_logged(Event::OrderPlaced {
                order_id: header.id,
                customer_id,
                total_amount: header.total_amount,
            })
            .await;

        info!(order_number = %header.order_number, "COD order committed");
        Ok(SettlementOutcome::Committed {
            order_number: header.order_number,
            payment_status: header.payment_status,
            total_amount: header.total_amount,
        })
    }
}

#[async_trait]
impl SettlementHandler for WalletSettlement {
    async fn settle(
        &self,
        svc: &PaymentService,
        customer_id: Uuid,
        assembled: AssembledOrder,
    ) -> Result<SettlementOutcome, ServiceError> {
        // Debit and order commit are one unit: either both land or neither.
        let txn = svc.db_pool.begin().await.map_err(ServiceError::db_error)?;
        let (header, _items) = orders::insert_order(
            &txn,
            &assembled,
            OrderSeed {
                payment_method: PaymentMethod::Wallet,
                payment_status: PaymentStatus::Paid,
                order_status: OrderStatus::Processing,
                gateway_order_id: None,
            },
        )
        .await?;
        let wallet_id = wallet::debit(
            &txn,
            customer_id,
            header.total_amount,
            &format!("Payment for order {}", header.order_number),
            Some(header.id),
        )
        .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        svc.cart_service.clear_cart(customer_id).await?;
        svc.event_sender
            .send_logged(Event::OrderPlaced {
                order_id: header.id,
                customer_id,
                total_amount: header.total_amount,
            })
            .await;
        svc.event_sender
            .send_logged(Event::WalletDebited {
                wallet_id,
                amount: header.total_amount,
            })
            .await;
        svc.event_sender
            .send_logged(Event::PaymentCaptured {
                order_id: header.id,
                amount: header.total_amount,
            })
            .await;

        info!(order_number = %header.order_number, "wallet order committed and captured");
        Ok(SettlementOutcome::Committed {
            order_number: header.order_number,
            payment_status: header.payment_status,
            total_amount: header.total_amount,
        })
    }
}

#[async_trait]
impl SettlementHandler for GatewaySettlement {
    async fn settle(
        &self,
        svc: &PaymentService,
        customer_id: Uuid,
        assembled: AssembledOrder,
    ) -> Result<SettlementOutcome, ServiceError> {
        // The intent is created before anything is persisted, so a gateway
        // outage surfaces cleanly with no half-created order.
        let receipt = Uuid::new_v4().simple().to_string();
        let intent_id = svc
            .gateway
            .create_intent(assembled.total_amount, &svc.currency, &receipt)
            .await?;

        let txn = svc.db_pool.begin().await.map_err(ServiceError::db_error)?;

        let previous_failed = OrderEntity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::PaymentMethod.eq(PaymentMethod::Gateway))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Failed))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .order_by_desc(order::Column::CreatedAt)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let header = match previous_failed {
            Some(prev) => match svc.reuse_failed_order(&txn, &prev, &assembled, &intent_id).await {
                Ok(header) => header,
                // Lost the claim race: another checkout took the stale order.
                Err(ServiceError::ConcurrencyConflict(_)) => {
                    svc.insert_gateway_order(&txn, &assembled, &intent_id).await?
                }
                Err(e) => return Err(e),
            },
            None => svc.insert_gateway_order(&txn, &assembled, &intent_id).await?,
        };

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(order_number = %header.order_number, gateway_order_id = %intent_id, "gateway order awaiting capture");
        Ok(SettlementOutcome::AwaitingGateway {
            order_number: header.order_number,
            gateway_order_id: intent_id,
            total_amount: header.total_amount,
            currency: svc.currency.clone(),
        })
    }
}

/// Payment settlement adapter: reconciles the three payment paths into one
/// consistent order record, and verifies gateway callbacks.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    cart_service: Arc<CartService>,
    order_service: Arc<OrderService>,
    pricing_service: Arc<PricingService>,
    gateway: Arc<dyn PaymentGateway>,
    gateway_secret: String,
    currency: String,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        cart_service: Arc<CartService>,
        order_service: Arc<OrderService>,
        pricing_service: Arc<PricingService>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_secret: String,
        currency: String,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            cart_service,
            order_service,
            pricing_service,
            gateway,
            gateway_secret,
            currency,
        }
    }

    /// Full checkout: snapshot-validate the cart, revalidate address and
    /// coupon, price the order, then settle through the method's handler.
    #[instrument(skip(self))]
    pub async fn place_order(
        &self,
        customer_id: Uuid,
        address_id: Uuid,
        payment_method: PaymentMethod,
        coupon_code: Option<String>,
    ) -> Result<SettlementOutcome, ServiceError> {
        let lines = self.cart_service.build_snapshot(customer_id).await?;
        let address = self
            .order_service
            .resolve_address(customer_id, address_id)
            .await?;

        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
        let coupon = match coupon_code.as_deref() {
            Some(code) => Some(self.pricing_service.validate_coupon(code, subtotal).await?),
            None => None,
        };

        let assembled = orders::assemble_order(
            customer_id,
            lines,
            address,
            coupon,
            self.pricing_service.tax_rate(),
            self.pricing_service.commission_rate(),
        );

        let handler: &dyn SettlementHandler = match payment_method {
            PaymentMethod::CashOnDelivery => &CodSettlement,
            PaymentMethod::Wallet => &WalletSettlement,
            PaymentMethod::Gateway => &GatewaySettlement,
        };
        handler.settle(self, customer_id, assembled).await
    }

    /// Phase 2 of the gateway flow: verifies the callback signature and flips
    /// the order to paid/processing, or back to failed/pending for a retry.
    #[instrument(skip(self, callback), fields(gateway_order_id = %callback.gateway_order_id))]
    pub async fn verify_payment(
        &self,
        callback: GatewayCallback,
    ) -> Result<SettlementOutcome, ServiceError> {
        let header = OrderEntity::find()
            .filter(order::Column::GatewayOrderId.eq(callback.gateway_order_id.clone()))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no order for gateway id {}",
                    callback.gateway_order_id
                ))
            })?;

        match verify_signature(
            &self.gateway_secret,
            &callback.gateway_order_id,
            &callback.gateway_payment_id,
            &callback.signature,
        ) {
            Ok(()) => {
                self.flip_payment_state(
                    &header,
                    PaymentStatus::Paid,
                    OrderStatus::Processing,
                    Some(callback.gateway_payment_id.clone()),
                )
                .await?;
                // The cart survives until capture is confirmed.
                self.cart_service.clear_cart(header.customer_id).await?;
                self.event_sender
                    .send_logged(Event::PaymentCaptured {
                        order_id: header.id,
                        amount: header.total_amount,
                    })
                    .await;
                info!(order_number = %header.order_number, "gateway payment captured");

                Ok(SettlementOutcome::Committed {
                    order_number: header.order_number,
                    payment_status: PaymentStatus::Paid,
                    total_amount: header.total_amount,
                })
            }
            Err(err) => {
                warn!(order_number = %header.order_number, "gateway signature mismatch");
                self.flip_payment_state(&header, PaymentStatus::Failed, OrderStatus::Pending, None)
                    .await?;
                self.event_sender
                    .send_logged(Event::PaymentFailed {
                        order_id: header.id,
                    })
                    .await;
                Err(err)
            }
        }
    }

    /// Version-guarded payment-state flip, retried once on a lost race.
    async fn flip_payment_state(
        &self,
        header: &order::Model,
        payment_status: PaymentStatus,
        order_status: OrderStatus,
        gateway_payment_id: Option<String>,
    ) -> Result<(), ServiceError> {
        let mut current = header.clone();
        for attempt in 0..2 {
            if !current.payment_status.can_transition(payment_status) {
                return Err(ServiceError::InvalidOperation(format!(
                    "order {} payment state cannot move from {} to {}",
                    current.order_number, current.payment_status, payment_status
                )));
            }

            let result = OrderEntity::update_many()
                .col_expr(order::Column::PaymentStatus, Expr::value(payment_status))
                .col_expr(order::Column::Status, Expr::value(order_status))
                .col_expr(
                    order::Column::GatewayPaymentId,
                    Expr::value(gateway_payment_id.clone()),
                )
                .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                .col_expr(order::Column::Version, Expr::value(current.version + 1))
                .filter(order::Column::Id.eq(current.id))
                .filter(order::Column::Version.eq(current.version))
                .exec(&*self.db_pool)
                .await
                .map_err(ServiceError::db_error)?;

            if result.rows_affected > 0 {
                return Ok(());
            }
            if attempt == 0 {
                current = OrderEntity::find_by_id(current.id)
                    .one(&*self.db_pool)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| ServiceError::NotFound("order vanished".to_string()))?;
            }
        }
        Err(ServiceError::ConcurrencyConflict(header.id))
    }

    async fn insert_gateway_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        assembled: &AssembledOrder,
        intent_id: &str,
    ) -> Result<order::Model, ServiceError> {
        let (header, _items) = orders::insert_order(
            conn,
            assembled,
            OrderSeed {
                payment_method: PaymentMethod::Gateway,
                payment_status: PaymentStatus::Failed,
                order_status: OrderStatus::Pending,
                gateway_order_id: Some(intent_id.to_string()),
            },
        )
        .await?;
        Ok(header)
    }

    /// Claims a customer's stale failed gateway order for a fresh attempt:
    /// restocks and replaces its items, rewrites totals and the intent id.
    /// The version guard makes the claim exclusive under concurrent retries.
    async fn reuse_failed_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        prev: &order::Model,
        assembled: &AssembledOrder,
        intent_id: &str,
    ) -> Result<order::Model, ServiceError> {
        let claim = OrderEntity::update_many()
            .col_expr(order::Column::Subtotal, Expr::value(assembled.subtotal))
            .col_expr(order::Column::TaxAmount, Expr::value(assembled.tax_amount))
            .col_expr(
                order::Column::DiscountAmount,
                Expr::value(assembled.discount_amount),
            )
            .col_expr(
                order::Column::TotalAmount,
                Expr::value(assembled.total_amount),
            )
            .col_expr(
                order::Column::TotalCommission,
                Expr::value(assembled.total_commission),
            )
            .col_expr(
                order::Column::TotalVendorEarnings,
                Expr::value(assembled.total_vendor_earnings),
            )
            .col_expr(
                order::Column::CouponCode,
                Expr::value(assembled.coupon.as_ref().map(|c| c.code.clone())),
            )
            .col_expr(
                order::Column::ShippingAddress,
                Expr::value(
                    serde_json::to_string(&assembled.shipping_address)
                        .map_err(|e| ServiceError::InternalError(e.to_string()))?,
                ),
            )
            .col_expr(
                order::Column::GatewayOrderId,
                Expr::value(Some(intent_id.to_string())),
            )
            .col_expr(order::Column::GatewayPaymentId, Expr::value(None::<String>))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .col_expr(order::Column::Version, Expr::value(prev.version + 1))
            .filter(order::Column::Id.eq(prev.id))
            .filter(order::Column::Version.eq(prev.version))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Failed))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if claim.rows_affected == 0 {
            return Err(ServiceError::ConcurrencyConflict(prev.id));
        }

        // The stale attempt held stock; hand it back before re-reserving for
        // the new snapshot (quantities may differ between attempts).
        let stale_items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(prev.id))
            .all(conn)
            .await
            .map_err(ServiceError::db_error)?;
        for item in &stale_items {
            catalog::increment_stock(conn, item.variant_id, item.quantity).await?;
        }
        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(prev.id))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        let now = Utc::now();
        for l in &assembled.lines {
            catalog::decrement_stock(conn, l.line.variant_id, l.line.quantity).await?;
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(prev.id),
                product_id: Set(l.line.product_id),
                vendor_id: Set(l.line.vendor_id),
                variant_id: Set(l.line.variant_id),
                sku: Set(l.line.sku.clone()),
                name: Set(l.line.name.clone()),
                quantity: Set(l.line.quantity),
                price_at_purchase: Set(l.line.unit_price),
                line_total: Set(l.line.line_total),
                commission_amount: Set(l.commission_amount),
                vendor_earning: Set(l.vendor_earning),
                status: Set(crate::entities::order_item::ItemStatus::Processing),
                returned_quantity: Set(0),
                created_at: Set(now),
                updated_at: Set(None),
            };
            sea_orm::ActiveModelTrait::insert(item, conn)
                .await
                .map_err(ServiceError::db_error)?;
        }

        OrderEntity::find_by_id(prev.id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("order vanished during reuse".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret";

    #[test]
    fn matching_signature_verifies() {
        let sig = compute_signature(SECRET, "order_abc", "pay_123");
        assert!(verify_signature(SECRET, "order_abc", "pay_123", &sig).is_ok());
    }

    #[test]
    fn tampered_payment_id_is_rejected() {
        let sig = compute_signature(SECRET, "order_abc", "pay_123");
        let err = verify_signature(SECRET, "order_abc", "pay_999", &sig).unwrap_err();
        assert!(matches!(err, ServiceError::SignatureMismatch));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let sig = compute_signature("other_secret", "order_abc", "pay_123");
        assert!(verify_signature(SECRET, "order_abc", "pay_123", &sig).is_err());
    }

    #[test]
    fn malformed_hex_is_rejected_not_panicking() {
        let err = verify_signature(SECRET, "order_abc", "pay_123", "not-hex!").unwrap_err();
        assert!(matches!(err, ServiceError::SignatureMismatch));
    }
}
