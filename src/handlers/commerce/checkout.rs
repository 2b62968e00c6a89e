use crate::{
    auth::AuthUser,
    services::commerce::{CheckoutOutcome, PaymentSession},
    ApiResponse, ApiResult, AppState,
};
use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

/// Client-side payment confirmation parameters
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentSessionResponse {
    #[serde(rename = "pubKey")]
    pub pub_key: Option<String>,
    pub secret: String,
}

impl From<PaymentSession> for PaymentSessionResponse {
    fn from(session: PaymentSession) -> Self {
        Self {
            pub_key: session.publishable_key,
            secret: session.client_secret,
        }
    }
}

/// Start a checkout for the current cart, or resume the unresolved one
#[utoipa::path(
    get,
    path = "/transactions/payment",
    responses(
        (status = 200, description = "Payment session created", body = PaymentSessionResponse),
        (status = 400, description = "Cart is empty", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway rejected the payment", body = crate::errors::ErrorResponse),
        (status = 503, description = "Gateway unavailable, retry later", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn make_payment(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<PaymentSessionResponse> {
    let session = state.services.checkout.start_checkout(user.user_id).await?;
    Ok(Json(ApiResponse::with_message(
        session.into(),
        "Payment session created",
    )))
}

/// Verify the outcome of the current checkout
#[utoipa::path(
    get,
    path = "/transactions/payment/verify",
    responses(
        (status = 200, description = "Payment outcome", body = CheckoutOutcome),
        (status = 404, description = "No checkout started", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cart changed after payment started", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<CheckoutOutcome> {
    let outcome = state.services.checkout.verify_checkout(user.user_id).await?;
    let message = outcome.message();
    Ok(Json(ApiResponse::with_message(outcome, message)))
}
