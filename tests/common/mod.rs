#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use storefront_api::{
    auth::{AuthConfig, AuthService, TokenSubject, ADMIN_ROLE, CUSTOMER_ROLE},
    config::AppConfig,
    db,
    entities::{commerce::product, user},
    handlers::AppServices,
    services::payments::PaymentVerifier,
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "k7Qz9mP2xW4vB8nR1tY6uJ3hL5fD0sA9-storefront-tests";

/// A signed-in caller
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

/// Application backed by a throwaway SQLite file with the schema migrated.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    auth_service: Arc<AuthService>,
    _db_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_verifier(PaymentVerifier::disabled()).await
    }

    /// Builds the app with a payment verifier pointing at `base_url`.
    pub async fn with_payment_provider(base_url: &str) -> Self {
        let gateway = storefront_api::services::payments::PortOnePaymentGateway::new(
            base_url,
            storefront_api::services::payments::PortOneCredentials {
                api_key: "test-key".to_string(),
                api_secret: "test-secret".to_string(),
            },
            std::time::Duration::from_secs(2),
        )
        .expect("payment gateway for tests");
        Self::with_verifier(PaymentVerifier::new(Arc::new(gateway))).await
    }

    pub async fn with_verifier(verifier: PaymentVerifier) -> Self {
        Self::build(verifier, 1).await
    }

    /// Pool with `connections` connections, so requests really overlap.
    pub async fn with_pool_size(connections: u32) -> Self {
        Self::build(PaymentVerifier::disabled(), connections).await
    }

    async fn build(verifier: PaymentVerifier, connections: u32) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let auth_service = Arc::new(AuthService::new(AuthConfig::from_app_config(&cfg)));
        let services = AppServices::with_verifier(db_arc.clone(), &cfg, verifier);

        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
            auth: auth_service.clone(),
        };

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            auth_service,
            _db_dir: db_dir,
        }
    }

    async fn sign_in(&self, name: &str, role: &str) -> TestUser {
        let id = Uuid::new_v4();
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));

        user::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            email: Set(email.clone()),
            role: Set(role.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user");

        let token = self
            .auth_service
            .issue_token(&TokenSubject {
                user_id: id,
                name: Some(name.to_string()),
                email: Some(email),
                roles: vec![role.to_string()],
            })
            .expect("issue test token");

        TestUser { id, token }
    }

    pub async fn customer(&self, name: &str) -> TestUser {
        self.sign_in(name, CUSTOMER_ROLE).await
    }

    pub async fn admin(&self) -> TestUser {
        self.sign_in("Store Admin", ADMIN_ROLE).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.seed_product_with(name, price, 0, stock, true).await
    }

    pub async fn seed_product_with(
        &self,
        name: &str,
        price: Decimal,
        discount: i32,
        stock: i32,
        is_active: bool,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(Some(format!("SKU-{}", &Uuid::new_v4().simple().to_string()[..8]))),
            price: Set(price),
            discount: Set(discount),
            stock: Set(stock),
            sales: Set(0),
            sizes: Set(Some(json!(["S", "M", "L"]))),
            colors: Set(Some(json!(["black", "white"]))),
            images: Set(Some(json!([format!("https://cdn.example.com/{}.jpg", name)]))),
            category: Set(Some("tops".to_string())),
            brand: Set(None),
            is_active: Set(is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, user: &TestUser) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, Some(&user.token)).await
    }

    pub async fn post(&self, uri: &str, body: Value, user: &TestUser) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), Some(&user.token))
            .await
    }

    pub async fn put(&self, uri: &str, body: Value, user: &TestUser) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body), Some(&user.token))
            .await
    }

    pub async fn delete(&self, uri: &str, user: &TestUser) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, None, Some(&user.token))
            .await
    }

    /// Places an order for the given `(product, quantity)` lines.
    pub async fn place_order(
        &self,
        user: &TestUser,
        lines: &[(Uuid, i32)],
        payment: Value,
    ) -> (StatusCode, Value) {
        self.post("/api/v1/orders", order_body(lines, payment), user)
            .await
    }
}

pub fn shipping_address() -> Value {
    json!({
        "name": "Kim Minji",
        "phone": "010-1234-5678",
        "street": "123 Teheran-ro",
        "detail": "Apt 1001",
        "city": "Seoul",
        "postal_code": "06236"
    })
}

pub fn order_body(lines: &[(Uuid, i32)], payment: Value) -> Value {
    let items: Vec<Value> = lines
        .iter()
        .map(|(product_id, quantity)| json!({ "product_id": product_id, "quantity": quantity }))
        .collect();
    json!({
        "items": items,
        "shipping_address": shipping_address(),
        "payment": payment,
    })
}

pub fn card_payment() -> Value {
    json!({ "method": "card" })
}

pub fn paid_card_payment(transaction_id: &str) -> Value {
    json!({ "method": "card", "status": "paid", "transaction_id": transaction_id })
}

/// Decimals serialize as strings; accept either shape.
pub fn dec_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal, got {other}"),
    }
}
