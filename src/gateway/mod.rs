//! Payment gateway seam.
//!
//! The checkout orchestrator only talks to [`PaymentGateway`]; provider
//! specifics (wire format, credentials, status vocabulary) stay inside the
//! adapters. The adapter is chosen once at startup from configuration.

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AppConfig;

pub mod in_memory;
pub mod stripe;

pub use in_memory::InMemoryGateway;
pub use stripe::StripeGateway;

/// Payment creation parameters. `order_ref` doubles as the gateway idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub user_id: Uuid,
    pub order_ref: String,
}

impl CreatePaymentRequest {
    pub fn amount_minor_units(&self) -> Result<i64, GatewayError> {
        to_minor_units(self.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPayment {
    pub gateway_id: String,
    pub client_secret: String,
}

/// Settlement as reported by the provider, reduced to what checkout needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Succeeded,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStatus {
    pub settlement: Settlement,
    /// Provider response kept verbatim for the ledger audit log.
    pub raw: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway network error: {0}")]
    Network(String),
    #[error("gateway unavailable (status {status}): {message}")]
    Unavailable { status: u16, message: String },
    #[error("gateway rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
    #[error("invalid payment amount: {0}")]
    InvalidAmount(String),
    #[error("gateway misconfigured: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Timeouts, connection failures, throttling and 5xx answers may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout | GatewayError::Network(_) | GatewayError::Unavailable { .. }
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short provider name used in logs.
    fn provider(&self) -> &'static str;

    /// Client-facing key handed out with the client secret.
    fn publishable_key(&self) -> Option<String>;

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<GatewayPayment, GatewayError>;

    async fn payment_status(&self, gateway_id: &str) -> Result<GatewayStatus, GatewayError>;
}

/// Converts a decimal amount into the currency's minor unit (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount.is_sign_negative() {
        return Err(GatewayError::InvalidAmount(format!(
            "amount must be non-negative, got {}",
            amount
        )));
    }
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidAmount(format!("amount {} out of range", amount)))
}

/// Builds the gateway adapter named by `payment_provider`.
pub fn from_config(cfg: &AppConfig) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
    match cfg.payment_provider.to_ascii_lowercase().as_str() {
        "stripe" => {
            let secret_key = cfg.stripe_secret_key.clone().ok_or_else(|| {
                GatewayError::Configuration("stripe_secret_key is required".to_string())
            })?;
            let gateway = StripeGateway::new(
                secret_key,
                cfg.stripe_publishable_key.clone(),
                cfg.stripe_api_base.clone(),
                Duration::from_secs(cfg.payment_gateway_timeout_secs),
            )?;
            Ok(Arc::new(gateway))
        }
        "in-memory" => Ok(Arc::new(
            InMemoryGateway::new().with_publishable_key(cfg.stripe_publishable_key.clone()),
        )),
        other => Err(GatewayError::Configuration(format!(
            "unknown payment provider '{}'",
            other
        ))),
    }
}
