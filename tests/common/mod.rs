use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use marketplace_api::{
    config::AppConfig,
    db,
    entities::{coupon, customer, customer_address, product, product_variant},
    errors::ServiceError,
    events,
    handlers::{self, AppServices},
    services::payments::PaymentGateway,
    AppState,
};

/// Gateway double: hands out sequential intent ids and records how many
/// intents were created.
pub struct FakeGateway {
    counter: AtomicU64,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn intents_created(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(
        &self,
        _amount: Decimal,
        _currency: &str,
        _receipt: &str,
    ) -> Result<String, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("gw_order_{n}"))
    }
}

/// Test application over a fresh in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub services: AppServices,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        // In-memory SQLite lives and dies with its single connection.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("connect to in-memory sqlite");
        db::run_migrations(&pool).await.expect("run migrations");
        let db = Arc::new(pool);

        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::new());
        let services = handlers::build_services(
            db.clone(),
            event_sender.clone(),
            &cfg,
            gateway.clone(),
        );

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services: services.clone(),
        };

        Self {
            state,
            services,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &Arc<sea_orm::DatabaseConnection> {
        &self.state.db
    }

    pub async fn seed_customer(&self) -> customer::Model {
        let id = Uuid::new_v4();
        customer::ActiveModel {
            id: Set(id),
            email: Set(format!("{id}@example.com")),
            name: Set("Test Customer".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&**self.db())
        .await
        .expect("insert customer")
    }

    pub async fn seed_address(&self, customer_id: Uuid) -> customer_address::Model {
        customer_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            recipient_name: Set("Test Customer".to_string()),
            line1: Set("1 Market St".to_string()),
            line2: Set(None),
            city: Set("Pune".to_string()),
            state: Set("MH".to_string()),
            postal_code: Set("411001".to_string()),
            country: Set("IN".to_string()),
            phone: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&**self.db())
        .await
        .expect("insert address")
    }

    /// Seeds an approved, listed product with one variant.
    pub async fn seed_variant(
        &self,
        vendor_id: Uuid,
        price: Decimal,
        stock: i32,
    ) -> (product::Model, product_variant::Model) {
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            vendor_id: Set(vendor_id),
            name: Set("Widget".to_string()),
            is_listed: Set(true),
            approval_status: Set(product::ApprovalStatus::Approved),
            created_at: Set(Utc::now()),
        }
        .insert(&**self.db())
        .await
        .expect("insert product");

        let variant = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            sku: Set(format!("SKU-{}", Uuid::new_v4().simple())),
            price: Set(price),
            discounted_price: Set(None),
            stock: Set(stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&**self.db())
        .await
        .expect("insert variant");

        (product, variant)
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_percent: Decimal,
        min_purchase: Decimal,
    ) -> coupon::Model {
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_percent: Set(discount_percent),
            min_purchase: Set(min_purchase),
            expires_at: Set(Utc::now() + Duration::days(30)),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&**self.db())
        .await
        .expect("insert coupon")
    }

    pub async fn add_to_cart(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) {
        self.services
            .cart
            .add_item(customer_id, product_id, variant_id, quantity)
            .await
            .expect("add cart item");
    }

    pub async fn fund_wallet(&self, owner_id: Uuid, amount: Decimal) {
        self.services
            .wallet
            .credit(owner_id, amount, "Test top-up", None)
            .await
            .expect("fund wallet");
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        use sea_orm::EntityTrait;
        product_variant::Entity::find_by_id(variant_id)
            .one(&**self.db())
            .await
            .expect("query variant")
            .expect("variant exists")
            .stock
    }
}
