mod common;

use common::TestApp;
use marketplace_api::{
    entities::order::{OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::payments::SettlementOutcome,
};
use rust_decimal_macros::dec;

#[tokio::test]
async fn cod_checkout_commits_order_and_clears_cart() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;
    let (product, variant) = app
        .seed_variant(uuid::Uuid::new_v4(), dec!(500), 10)
        .await;
    app.add_to_cart(customer.id, product.id, variant.id, 2).await;

    let outcome = app
        .services
        .payments
        .place_order(customer.id, address.id, PaymentMethod::CashOnDelivery, None)
        .await
        .expect("COD checkout succeeds");

    let order_number = match outcome {
        SettlementOutcome::Committed {
            order_number,
            payment_status,
            total_amount,
        } => {
            assert_eq!(payment_status, PaymentStatus::Pending);
            // 1000 subtotal + 18% tax
            assert_eq!(total_amount, dec!(1180.00));
            order_number
        }
        other => panic!("expected committed order, got {other:?}"),
    };

    let (header, items) = app
        .services
        .orders
        .get_order(customer.id, &order_number)
        .await
        .expect("order readable");
    assert_eq!(header.status, OrderStatus::Processing);
    assert_eq!(header.subtotal, dec!(1000));
    assert_eq!(header.tax_amount, dec!(180.00));
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);
    // commission split holds per line
    assert_eq!(
        items[0].commission_amount + items[0].vendor_earning,
        items[0].line_total
    );

    assert_eq!(app.variant_stock(variant.id).await, 8);
    let cart_items = app
        .services
        .cart
        .get_items(customer.id)
        .await
        .expect("cart readable");
    assert!(cart_items.is_empty(), "cart cleared after commit");
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;

    let err = app
        .services
        .payments
        .place_order(customer.id, address.id, PaymentMethod::CashOnDelivery, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn foreign_address_is_rejected() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let stranger = app.seed_customer().await;
    let foreign_address = app.seed_address(stranger.id).await;
    let (product, variant) = app.seed_variant(uuid::Uuid::new_v4(), dec!(100), 5).await;
    app.add_to_cart(customer.id, product.id, variant.id, 1).await;

    let err = app
        .services
        .payments
        .place_order(
            customer.id,
            foreign_address.id,
            PaymentMethod::CashOnDelivery,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn wallet_checkout_debits_exactly_the_total() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;
    let (product, variant) = app.seed_variant(uuid::Uuid::new_v4(), dec!(100), 5).await;
    app.add_to_cart(customer.id, product.id, variant.id, 1).await;
    app.fund_wallet(customer.id, dec!(500)).await;

    let outcome = app
        .services
        .payments
        .place_order(customer.id, address.id, PaymentMethod::Wallet, None)
        .await
        .expect("wallet checkout succeeds");

    match outcome {
        SettlementOutcome::Committed {
            payment_status,
            total_amount,
            ..
        } => {
            assert_eq!(payment_status, PaymentStatus::Paid);
            assert_eq!(total_amount, dec!(118.00));
        }
        other => panic!("expected committed order, got {other:?}"),
    }

    let balance = app
        .services
        .wallet
        .balance(customer.id)
        .await
        .expect("balance readable");
    assert_eq!(balance, dec!(382.00));
}

#[tokio::test]
async fn insufficient_wallet_balance_leaves_everything_untouched() {
    // Scenario: balance 500, order total 700 -> rejected, nothing changes.
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;
    // 593.22 * 1.18 = 700.00
    let (product, variant) = app
        .seed_variant(uuid::Uuid::new_v4(), dec!(593.22), 5)
        .await;
    app.add_to_cart(customer.id, product.id, variant.id, 1).await;
    app.fund_wallet(customer.id, dec!(500)).await;

    let err = app
        .services
        .payments
        .place_order(customer.id, address.id, PaymentMethod::Wallet, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientBalance));

    assert_eq!(
        app.services.wallet.balance(customer.id).await.unwrap(),
        dec!(500),
        "balance unchanged"
    );
    assert_eq!(app.variant_stock(variant.id).await, 5, "stock unchanged");
    let (orders, total) = app
        .services
        .orders
        .get_order_history(customer.id, 1, 20)
        .await
        .unwrap();
    assert!(orders.is_empty());
    assert_eq!(total, 0);
    assert!(
        !app.services
            .cart
            .get_items(customer.id)
            .await
            .unwrap()
            .is_empty(),
        "cart kept for retry"
    );
}

#[tokio::test]
async fn coupon_applies_above_minimum_purchase() {
    // Scenario: minPurchase 1000, 10% coupon on subtotal 1200.
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;
    let (product, variant) = app
        .seed_variant(uuid::Uuid::new_v4(), dec!(600), 5)
        .await;
    app.add_to_cart(customer.id, product.id, variant.id, 2).await;
    app.seed_coupon("SAVE10", dec!(10), dec!(1000)).await;

    let outcome = app
        .services
        .payments
        .place_order(
            customer.id,
            address.id,
            PaymentMethod::CashOnDelivery,
            Some("SAVE10".to_string()),
        )
        .await
        .expect("couponed checkout succeeds");

    match outcome {
        SettlementOutcome::Committed {
            order_number,
            total_amount,
            ..
        } => {
            // 1200 - 120 + 216 tax
            assert_eq!(total_amount, dec!(1296.00));
            let (header, _) = app
                .services
                .orders
                .get_order(customer.id, &order_number)
                .await
                .unwrap();
            assert_eq!(header.discount_amount, dec!(120.00));
            assert_eq!(header.coupon_code.as_deref(), Some("SAVE10"));
        }
        other => panic!("expected committed order, got {other:?}"),
    }
}

#[tokio::test]
async fn coupon_below_minimum_purchase_blocks_checkout() {
    let app = TestApp::new().await;
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;
    let (product, variant) = app.seed_variant(uuid::Uuid::new_v4(), dec!(300), 5).await;
    app.add_to_cart(customer.id, product.id, variant.id, 1).await;
    app.seed_coupon("SAVE10", dec!(10), dec!(1000)).await;

    let err = app
        .services
        .payments
        .place_order(
            customer.id,
            address.id,
            PaymentMethod::CashOnDelivery,
            Some("SAVE10".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCoupon(_)));
    assert_eq!(app.variant_stock(variant.id).await, 5);
}

#[tokio::test]
async fn concurrent_checkouts_cannot_oversell_the_last_unit() {
    let app = TestApp::new().await;
    let first = app.seed_customer().await;
    let second = app.seed_customer().await;
    let first_address = app.seed_address(first.id).await;
    let second_address = app.seed_address(second.id).await;
    let (product, variant) = app.seed_variant(uuid::Uuid::new_v4(), dec!(50), 1).await;
    app.add_to_cart(first.id, product.id, variant.id, 1).await;
    app.add_to_cart(second.id, product.id, variant.id, 1).await;

    let one = app
        .services
        .payments
        .place_order(first.id, first_address.id, PaymentMethod::CashOnDelivery, None)
        .await;
    let two = app
        .services
        .payments
        .place_order(
            second.id,
            second_address.id,
            PaymentMethod::CashOnDelivery,
            None,
        )
        .await;

    // The first buyer drains the stock; the second sees an empty snapshot.
    assert!(one.is_ok());
    assert!(two.is_err());
    assert_eq!(app.variant_stock(variant.id).await, 0);
}
