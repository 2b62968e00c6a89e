//! Stripe PaymentIntents adapter.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{instrument, warn};

use super::{
    CreatePaymentRequest, GatewayError, GatewayPayment, GatewayStatus, PaymentGateway, Settlement,
};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
    #[serde(default)]
    last_payment_error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Maps a PaymentIntent status onto checkout settlement.
pub fn settlement_from_intent(status: &str, has_payment_error: bool) -> Settlement {
    match status {
        "succeeded" => Settlement::Succeeded,
        "canceled" => Settlement::Failed,
        "requires_payment_method" if has_payment_error => Settlement::Failed,
        _ => Settlement::Pending,
    }
}

#[derive(Clone)]
pub struct StripeGateway {
    http: Client,
    secret_key: String,
    publishable_key: Option<String>,
    api_base: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .field("publishable_key", &self.publishable_key)
            .finish_non_exhaustive()
    }
}

impl StripeGateway {
    pub fn new(
        secret_key: String,
        publishable_key: Option<String>,
        api_base: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        if secret_key.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "stripe secret key must not be empty".to_string(),
            ));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        let api_base = api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            secret_key,
            publishable_key,
            api_base,
        })
    }

    fn map_error(status: StatusCode, body: &str) -> GatewayError {
        let message = serde_json::from_str::<StripeErrorEnvelope>(body)
            .ok()
            .map(|env| {
                let message = env.error.message.unwrap_or_default();
                match env.error.code {
                    Some(code) => format!("{}: {}", code, message),
                    None => message,
                }
            })
            .unwrap_or_else(|| body.to_string());

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            GatewayError::Unavailable {
                status: status.as_u16(),
                message,
            }
        } else {
            GatewayError::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }

    async fn read_intent(
        response: reqwest::Response,
    ) -> Result<(PaymentIntent, serde_json::Value), GatewayError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(target: "stripe", status = status.as_u16(), "stripe request failed");
            return Err(Self::map_error(status, &body));
        }
        let raw: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let intent: PaymentIntent = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        Ok((intent, raw))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> &'static str {
        "stripe"
    }

    fn publishable_key(&self) -> Option<String> {
        self.publishable_key.clone()
    }

    #[instrument(skip(self, request), fields(order_ref = %request.order_ref))]
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let amount = request.amount_minor_units()?;
        let params = [
            ("amount", amount.to_string()),
            ("currency", request.currency.to_ascii_lowercase()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[user_id]", request.user_id.to_string()),
            ("metadata[order_ref]", request.order_ref.clone()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.order_ref)
            .form(&params)
            .send()
            .await?;

        let (intent, _) = Self::read_intent(response).await?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::InvalidResponse("payment intent without client_secret".to_string())
        })?;

        Ok(GatewayPayment {
            gateway_id: intent.id,
            client_secret,
        })
    }

    #[instrument(skip(self))]
    async fn payment_status(&self, gateway_id: &str) -> Result<GatewayStatus, GatewayError> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.api_base, gateway_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let (intent, raw) = Self::read_intent(response).await?;
        let settlement = settlement_from_intent(
            &intent.status,
            intent
                .last_payment_error
                .as_ref()
                .is_some_and(|e| !e.is_null()),
        );

        Ok(GatewayStatus { settlement, raw })
    }
}
