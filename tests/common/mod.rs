#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use marketplace_api::{
    auth::{Claims, JwtVerifier, SELLER_ROLE},
    config::AppConfig,
    db,
    entities::{product, ProductModel},
    events::{self, EventSender},
    gateway::in_memory::InMemoryGateway,
    handlers::AppServices,
    services::commerce::CheckoutSettings,
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const WEBHOOK_SECRET: &str = "whsec_integration_test";

/// Application harness backed by an in-memory SQLite database and the
/// in-memory payment gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<InMemoryGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(InMemoryGateway::new()).await
    }

    pub async fn with_gateway(gateway: InMemoryGateway) -> Self {
        Self::build(gateway, |_| {}).await
    }

    pub async fn build(gateway: InMemoryGateway, configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.payment_provider = "in-memory".to_string();
        cfg.cors_allow_any_origin = true;
        cfg.stripe_publishable_key = Some("pk_test_marketplace".to_string());
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
        configure(&mut cfg);

        let pool = db::connect_in_memory()
            .await
            .expect("failed to create test database");
        let db_arc = Arc::new(pool);

        let gateway = Arc::new(gateway.with_publishable_key(cfg.stripe_publishable_key.clone()));

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(
            db_arc.clone(),
            gateway.clone(),
            event_sender.clone(),
            CheckoutSettings::from(&cfg),
        );

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
            jwt: Arc::new(JwtVerifier::new(&cfg.jwt_secret)),
        };

        Self {
            router: marketplace_api::app_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            exp: (now + chrono::Duration::hours(1)).timestamp(),
            iat: Some(now.timestamp()),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("encode access token")
    }

    pub fn buyer_token(&self, user_id: Uuid) -> String {
        self.token_for(user_id, &[])
    }

    pub fn seller_token(&self, seller_id: Uuid) -> String {
        self.token_for(seller_id, &[SELLER_ROLE])
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
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
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn get(&self, uri: &str, token: &str) -> Response {
        self.request(Method::GET, uri, None, Some(token)).await
    }

    pub async fn post_raw(&self, uri: &str, body: Vec<u8>, headers: &[(&str, String)]) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let request = builder
            .body(Body::from(body))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn add_to_cart(&self, token: &str, product_id: Uuid, qty: i32) -> Response {
        self.request(
            Method::POST,
            "/users/cart",
            Some(serde_json::json!({ "product_id": product_id, "qty": qty })),
            Some(token),
        )
        .await
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        seller_id: Uuid,
        stock: i32,
    ) -> ProductModel {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(Some(format!("{} seeded for integration tests", name))),
            image_url: Set(Some(format!("https://img.example.com/{}.png", name))),
            price: Set(price),
            seller_id: Set(seller_id),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }

    pub async fn set_price(&self, product: &ProductModel, price: Decimal) {
        let mut active: product::ActiveModel = product.clone().into();
        active.price = Set(price);
        active.updated_at = Set(Utc::now());
        active
            .update(&*self.state.db)
            .await
            .expect("update product price");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

pub fn as_decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}

impl TestApp {
    /// Marks the user's unresolved gateway payment with the given settlement.
    pub async fn settle_current(
        &self,
        user_id: Uuid,
        settlement: marketplace_api::gateway::Settlement,
    ) -> marketplace_api::entities::PaymentModel {
        let record = marketplace_api::repositories::PaymentRepository::find_unresolved_payment(
            &*self.state.db,
            user_id,
        )
        .await
        .expect("query unresolved payment")
        .expect("user has an unresolved payment");
        assert!(
            self.gateway.settle_order(&record.order_ref, settlement),
            "gateway has no payment for {}",
            record.order_ref
        );
        record
    }

    pub async fn payments_for(&self, user_id: Uuid) -> Vec<marketplace_api::entities::PaymentModel> {
        use marketplace_api::entities::{payment, Payment};
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

        Payment::find()
            .filter(payment::Column::UserId.eq(user_id))
            .all(&*self.state.db)
            .await
            .expect("list payments")
    }
}
