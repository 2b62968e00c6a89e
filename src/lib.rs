//! Marketplace API Library
//!
//! Cart, checkout and order services for a multi-seller marketplace, exposed
//! over a REST API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod middleware_helpers;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    extract::FromRef,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::JwtVerifier;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub jwt: Arc<JwtVerifier>,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
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

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(data)
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_routes() -> Router<AppState> {
    let users = Router::new()
        .route(
            "/users/cart",
            get(handlers::commerce::carts::get_cart).post(handlers::commerce::carts::add_to_cart),
        )
        .route("/users/order", get(handlers::orders::list_my_orders))
        .route("/users/order/:id", get(handlers::orders::get_my_order));

    let transactions = Router::new()
        .route(
            "/transactions/payment",
            get(handlers::commerce::checkout::make_payment),
        )
        .route(
            "/transactions/payment/verify",
            get(handlers::commerce::checkout::verify_payment),
        )
        // Signature-verified rather than token-authenticated
        .route(
            "/transactions/payment/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .route(
            "/transactions/seller/orders",
            get(handlers::orders::list_seller_orders),
        )
        .route(
            "/transactions/seller/orders/:id",
            get(handlers::orders::get_seller_order),
        );

    Router::new()
        .merge(handlers::health::health_routes())
        .merge(users)
        .merge(transactions)
}

/// Full application router with request ids, HTTP tracing and Swagger UI.
/// Transport concerns such as CORS and compression are layered on by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::<AppState>::new()
        .merge(api_routes())
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
