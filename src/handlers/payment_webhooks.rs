use crate::{
    errors::ServiceError, services::commerce::CheckoutOutcome, ApiResponse, ApiResult, AppState,
};
use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against the raw body.
pub fn verify_stripe_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", val)) => timestamp = Some(val),
            Some(("v1", val)) => signatures.push(val),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if now.abs_diff(ts) > tolerance.as_secs() {
        return Err(SignatureError::Expired);
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: PaymentIntentObject,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    metadata: PaymentMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentMetadata {
    #[serde(default)]
    user_id: Option<String>,
}

/// Acknowledgement body for gateway notifications
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<CheckoutOutcome>,
}

impl WebhookAck {
    fn ignored() -> Self {
        Self {
            received: true,
            outcome: None,
        }
    }
}

/// Gateway notification that a payment intent settled; triggers the same
/// verification path as the buyer's verify call.
#[utoipa::path(
    post,
    path = "/transactions/payment/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookAck),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 403, description = "Webhooks not enabled", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    let Some(secret) = state.config.payment_webhook_secret.as_deref() else {
        warn!("payment webhook received but no webhook secret is configured");
        return Err(ServiceError::Forbidden(
            "payment webhooks are not enabled".to_string(),
        ));
    };

    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized(SignatureError::Missing.to_string()))?;
    if let Err(err) = verify_stripe_signature(
        header,
        &body,
        secret,
        state.config.webhook_tolerance(),
        chrono::Utc::now().timestamp(),
    ) {
        warn!(error = %err, "payment webhook signature verification failed");
        return Err(ServiceError::Unauthorized(
            "invalid webhook signature".to_string(),
        ));
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    match event.event_type.as_str() {
        "payment_intent.succeeded" | "payment_intent.payment_failed" => {}
        other => {
            info!(event_type = other, "ignoring unhandled payment webhook");
            return Ok(Json(ApiResponse::with_message(
                WebhookAck::ignored(),
                "Event ignored",
            )));
        }
    }

    let Some(user_id) = resolve_owner(&state, &event.data.object).await? else {
        warn!(
            event_id = event.id.as_deref().unwrap_or(""),
            "payment webhook for an unknown payment"
        );
        return Ok(Json(ApiResponse::with_message(
            WebhookAck::ignored(),
            "Unknown payment",
        )));
    };

    match state.services.checkout.verify_checkout(user_id).await {
        Ok(outcome) => {
            info!(
                event_type = %event.event_type,
                user_id = %user_id,
                order_ref = outcome.order_ref(),
                "payment webhook processed"
            );
            let message = outcome.message();
            Ok(Json(ApiResponse::with_message(
                WebhookAck {
                    received: true,
                    outcome: Some(outcome),
                },
                message,
            )))
        }
        // Nothing the gateway can fix by redelivering.
        Err(err @ (ServiceError::NoActivePayment | ServiceError::CartChanged(_))) => {
            warn!(user_id = %user_id, error = %err, "payment webhook not applied");
            Ok(Json(ApiResponse::with_message(
                WebhookAck::ignored(),
                "Event not applied",
            )))
        }
        Err(err) => Err(err),
    }
}

async fn resolve_owner(
    state: &AppState,
    object: &PaymentIntentObject,
) -> Result<Option<Uuid>, ServiceError> {
    if let Some(user_id) = object
        .metadata
        .user_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok())
    {
        return Ok(Some(user_id));
    }
    match object.id.as_deref() {
        Some(gateway_id) => state.services.checkout.find_payment_owner(gateway_id).await,
        None => Ok(None),
    }
}
