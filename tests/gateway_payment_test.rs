mod common;

use common::TestApp;
use marketplace_api::{
    entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::payments::{compute_signature, GatewayCallback, SettlementOutcome},
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

async fn gateway_checkout(app: &TestApp) -> (uuid::Uuid, String, String) {
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;
    let (product, variant) = app.seed_variant(uuid::Uuid::new_v4(), dec!(250), 10).await;
    app.add_to_cart(customer.id, product.id, variant.id, 2).await;

    let outcome = app
        .services
        .payments
        .place_order(customer.id, address.id, PaymentMethod::Gateway, None)
        .await
        .expect("gateway phase 1 succeeds");

    match outcome {
        SettlementOutcome::AwaitingGateway {
            order_number,
            gateway_order_id,
            total_amount,
            ..
        } => {
            assert_eq!(total_amount, dec!(590.00));
            (customer.id, order_number, gateway_order_id)
        }
        other => panic!("expected awaiting-gateway outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn phase_one_parks_the_order_as_failed_pending() {
    let app = TestApp::new().await;
    let (customer_id, order_number, gateway_order_id) = gateway_checkout(&app).await;

    let (header, _) = app
        .services
        .orders
        .get_order(customer_id, &order_number)
        .await
        .unwrap();
    assert_eq!(header.status, OrderStatus::Pending);
    assert_eq!(header.payment_status, PaymentStatus::Failed);
    assert_eq!(header.gateway_order_id.as_deref(), Some(gateway_order_id.as_str()));

    // Cart survives until capture is verified.
    assert!(
        !app.services
            .cart
            .get_items(customer_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn matching_signature_captures_and_clears_the_cart() {
    let app = TestApp::new().await;
    let (customer_id, order_number, gateway_order_id) = gateway_checkout(&app).await;
    let secret = app.state.config.gateway.key_secret.clone();

    let signature = compute_signature(&secret, &gateway_order_id, "pay_001");
    let outcome = app
        .services
        .payments
        .verify_payment(GatewayCallback {
            gateway_order_id,
            gateway_payment_id: "pay_001".to_string(),
            signature,
        })
        .await
        .expect("verification succeeds");

    match outcome {
        SettlementOutcome::Committed { payment_status, .. } => {
            assert_eq!(payment_status, PaymentStatus::Paid)
        }
        other => panic!("expected committed outcome, got {other:?}"),
    }

    let (header, _) = app
        .services
        .orders
        .get_order(customer_id, &order_number)
        .await
        .unwrap();
    assert_eq!(header.status, OrderStatus::Processing);
    assert_eq!(header.payment_status, PaymentStatus::Paid);
    assert_eq!(header.gateway_payment_id.as_deref(), Some("pay_001"));
    assert!(app
        .services
        .cart
        .get_items(customer_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn tampered_signature_keeps_the_order_retryable() {
    let app = TestApp::new().await;
    let (customer_id, order_number, gateway_order_id) = gateway_checkout(&app).await;
    let secret = app.state.config.gateway.key_secret.clone();

    let signature = compute_signature(&secret, &gateway_order_id, "pay_legit");
    let err = app
        .services
        .payments
        .verify_payment(GatewayCallback {
            gateway_order_id,
            gateway_payment_id: "pay_forged".to_string(),
            signature,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SignatureMismatch));

    let (header, _) = app
        .services
        .orders
        .get_order(customer_id, &order_number)
        .await
        .unwrap();
    assert_eq!(header.status, OrderStatus::Pending);
    assert_eq!(header.payment_status, PaymentStatus::Failed);
    assert!(
        !app.services
            .cart
            .get_items(customer_id)
            .await
            .unwrap()
            .is_empty(),
        "cart untouched on mismatch"
    );
}

#[tokio::test]
async fn retry_reuses_the_failed_order_instead_of_duplicating() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;
    let (product, variant) = app.seed_variant(uuid::Uuid::new_v4(), dec!(100), 10).await;
    app.add_to_cart(customer.id, product.id, variant.id, 1).await;

    let first = app
        .services
        .payments
        .place_order(customer.id, address.id, PaymentMethod::Gateway, None)
        .await
        .expect("first attempt");
    let first_intent = match first {
        SettlementOutcome::AwaitingGateway {
            gateway_order_id, ..
        } => gateway_order_id,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(app.variant_stock(variant.id).await, 9);

    // Customer retries with a bigger cart; the parked order is reclaimed.
    app.add_to_cart(customer.id, product.id, variant.id, 1).await;
    let second = app
        .services
        .payments
        .place_order(customer.id, address.id, PaymentMethod::Gateway, None)
        .await
        .expect("second attempt");
    let second_intent = match second {
        SettlementOutcome::AwaitingGateway {
            gateway_order_id,
            total_amount,
            ..
        } => {
            assert_eq!(total_amount, dec!(236.00));
            gateway_order_id
        }
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_ne!(first_intent, second_intent);
    assert_eq!(app.gateway.intents_created(), 2);

    // Still a single order row, now holding the new snapshot, and the first
    // attempt's stock reservation was handed back before re-reserving.
    let headers = order::Entity::find()
        .filter(order::Column::CustomerId.eq(customer.id))
        .all(&**app.db())
        .await
        .unwrap();
    assert_eq!(headers.len(), 1);
    assert_eq!(
        headers[0].gateway_order_id.as_deref(),
        Some(second_intent.as_str())
    );
    assert_eq!(headers[0].total_amount, dec!(236.00));
    assert_eq!(app.variant_stock(variant.id).await, 8);
}
