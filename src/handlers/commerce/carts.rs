use crate::{
    auth::AuthUser,
    services::commerce::{AddToCartRequest, CartView},
    ApiResponse, ApiResult, AppState,
};
use axum::{extract::State, Json};

/// Current user's cart with its total
#[utoipa::path(
    get,
    path = "/users/cart",
    responses(
        (status = 200, description = "Cart lines and total", body = CartView),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.cart.get_cart(user.user_id).await?;
    Ok(Json(ApiResponse::with_message(cart, "Cart fetched successfully")))
}

/// Add a product, change its quantity, or remove it with `qty = 0`
#[utoipa::path(
    post,
    path = "/users/cart",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> ApiResult<CartView> {
    let cart = state.services.cart.add_to_cart(user.user_id, payload).await?;
    Ok(Json(ApiResponse::with_message(cart, "Cart updated successfully")))
}
