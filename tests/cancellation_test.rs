mod common;

use common::TestApp;
use marketplace_api::{
    commands::orders::{CancelItemSelector, CancelOrderCommand},
    commands::Command,
    entities::order::{OrderStatus, PaymentMethod},
    entities::order_item::ItemStatus,
    services::payments::SettlementOutcome,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

struct PlacedOrder {
    customer_id: Uuid,
    order_number: String,
    variants: Vec<(Uuid, Uuid, i32)>, // (product_id, variant_id, quantity)
}

/// Places a two-line order (400 and 600) through the given payment method.
async fn place_two_line_order(app: &TestApp, method: PaymentMethod) -> PlacedOrder {
    let customer = app.seed_customer().await;
    let address = app.seed_address(customer.id).await;
    let (product_a, variant_a) = app.seed_variant(Uuid::new_v4(), dec!(400), 10).await;
    let (product_b, variant_b) = app.seed_variant(Uuid::new_v4(), dec!(600), 10).await;
    app.add_to_cart(customer.id, product_a.id, variant_a.id, 1).await;
    app.add_to_cart(customer.id, product_b.id, variant_b.id, 1).await;
    if method == PaymentMethod::Wallet {
        app.fund_wallet(customer.id, dec!(2000)).await;
    }

    let outcome = app
        .services
        .payments
        .place_order(customer.id, address.id, method, None)
        .await
        .expect("checkout succeeds");
    let order_number = match outcome {
        SettlementOutcome::Committed { order_number, .. } => order_number,
        other => panic!("unexpected outcome {other:?}"),
    };

    PlacedOrder {
        customer_id: customer.id,
        order_number,
        variants: vec![
            (product_a.id, variant_a.id, 1),
            (product_b.id, variant_b.id, 1),
        ],
    }
}

fn cancel_command(placed: &PlacedOrder, items: Option<Vec<CancelItemSelector>>) -> CancelOrderCommand {
    CancelOrderCommand {
        customer_id: placed.customer_id,
        order_number: placed.order_number.clone(),
        items,
        tax_rate: dec!(0.18),
    }
}

#[tokio::test]
async fn partial_cancel_reduces_totals_and_restocks() {
    // Scenario: two items (400, 600), cancel the 400 one.
    let app = TestApp::new().await;
    let placed = place_two_line_order(&app, PaymentMethod::CashOnDelivery).await;
    let (product_a, variant_a, _) = placed.variants[0];

    let result = cancel_command(
        &placed,
        Some(vec![CancelItemSelector {
            product_id: product_a,
            variant_id: variant_a,
        }]),
    )
    .execute(
        app.state.db.clone(),
        Arc::new(app.state.event_sender.clone()),
    )
    .await
    .expect("partial cancel succeeds");

    assert_eq!(result.cancelled_items, 1);
    assert_eq!(result.order_status, OrderStatus::Processing);
    // 600 remaining + 18% tax on it
    assert_eq!(result.total_amount, dec!(708.00));
    assert_eq!(result.refunded_amount, dec!(0), "COD captured nothing");

    let (header, items) = app
        .services
        .orders
        .get_order(placed.customer_id, &placed.order_number)
        .await
        .unwrap();
    assert_eq!(header.subtotal, dec!(600));
    assert_eq!(header.tax_amount, dec!(108.00));
    assert_eq!(header.status, OrderStatus::Processing);

    let cancelled = items
        .iter()
        .find(|i| i.variant_id == variant_a)
        .expect("cancelled line present");
    assert_eq!(cancelled.status, ItemStatus::Cancelled);
    assert_eq!(app.variant_stock(variant_a).await, 10, "unit restocked");
}

#[tokio::test]
async fn cancelling_the_same_item_twice_changes_nothing_the_second_time() {
    let app = TestApp::new().await;
    let placed = place_two_line_order(&app, PaymentMethod::CashOnDelivery).await;
    let (product_a, variant_a, _) = placed.variants[0];
    let selector = vec![CancelItemSelector {
        product_id: product_a,
        variant_id: variant_a,
    }];

    let db = app.state.db.clone();
    let events = Arc::new(app.state.event_sender.clone());
    let first = cancel_command(&placed, Some(selector.clone()))
        .execute(db.clone(), events.clone())
        .await
        .unwrap();
    let second = cancel_command(&placed, Some(selector))
        .execute(db, events)
        .await
        .unwrap();

    assert_eq!(first.cancelled_items, 1);
    assert_eq!(second.cancelled_items, 0, "replay is a no-op");
    assert_eq!(second.total_amount, first.total_amount);
    assert_eq!(app.variant_stock(variant_a).await, 10, "no double restock");
}

#[tokio::test]
async fn full_cancel_marks_the_order_cancelled() {
    let app = TestApp::new().await;
    let placed = place_two_line_order(&app, PaymentMethod::CashOnDelivery).await;

    let result = cancel_command(&placed, None)
        .execute(
            app.state.db.clone(),
            Arc::new(app.state.event_sender.clone()),
        )
        .await
        .expect("full cancel succeeds");

    assert_eq!(result.cancelled_items, 2);
    assert_eq!(result.order_status, OrderStatus::Cancelled);

    // Stock round-trip: place + cancel returns every unit.
    for (_, variant_id, _) in &placed.variants {
        assert_eq!(app.variant_stock(*variant_id).await, 10);
    }

    // A cancelled order rejects further cancellation.
    let err = cancel_command(&placed, None)
        .execute(
            app.state.db.clone(),
            Arc::new(app.state.event_sender.clone()),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        marketplace_api::errors::ServiceError::InvalidOperation(_)
    ));
}

#[tokio::test]
async fn cancelling_a_paid_order_refunds_the_wallet() {
    let app = TestApp::new().await;
    let placed = place_two_line_order(&app, PaymentMethod::Wallet).await;
    // 2000 - 1180 captured at checkout
    assert_eq!(
        app.services.wallet.balance(placed.customer_id).await.unwrap(),
        dec!(820.00)
    );

    let (product_a, variant_a, _) = placed.variants[0];
    let result = cancel_command(
        &placed,
        Some(vec![CancelItemSelector {
            product_id: product_a,
            variant_id: variant_a,
        }]),
    )
    .execute(
        app.state.db.clone(),
        Arc::new(app.state.event_sender.clone()),
    )
    .await
    .expect("cancel succeeds");

    // Refund is the cancelled line's purchase value.
    assert_eq!(result.refunded_amount, dec!(400));
    assert_eq!(
        app.services.wallet.balance(placed.customer_id).await.unwrap(),
        dec!(1220.00)
    );
}
