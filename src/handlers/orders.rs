use crate::{
    auth::{AuthUser, SellerUser},
    repositories::SellerOrderDetails,
    services::commerce::OrderView,
    ApiResponse, ApiResult, AppState,
};
use axum::{
    extract::{Path, State},
    Json,
};

/// Orders placed by the current user, newest first
#[utoipa::path(
    get,
    path = "/users/order",
    responses(
        (status = 200, description = "Orders with their items", body = [OrderView])
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<OrderView>> {
    let orders = state.services.orders.list_user_orders(user.user_id).await?;
    Ok(Json(ApiResponse::with_message(
        orders,
        "Orders fetched successfully",
    )))
}

/// One of the current user's orders by its order reference
#[utoipa::path(
    get,
    path = "/users/order/{id}",
    params(("id" = String, Path, description = "Order reference")),
    responses(
        (status = 200, description = "Order with its items", body = OrderView),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_my_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_ref): Path<String>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .get_user_order(user.user_id, &order_ref)
        .await?;
    Ok(Json(ApiResponse::with_message(
        order,
        "Order fetched successfully",
    )))
}

/// Order lines sold by the current seller
#[utoipa::path(
    get,
    path = "/transactions/seller/orders",
    responses(
        (status = 200, description = "Seller order lines", body = [SellerOrderDetails]),
        (status = 403, description = "Caller is not a seller", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_seller_orders(
    State(state): State<AppState>,
    seller: SellerUser,
) -> ApiResult<Vec<SellerOrderDetails>> {
    let rows = state
        .services
        .orders
        .list_seller_orders(seller.seller_id())
        .await?;
    Ok(Json(ApiResponse::with_message(
        rows,
        "Orders fetched successfully",
    )))
}

/// The seller's lines of one order
#[utoipa::path(
    get,
    path = "/transactions/seller/orders/{id}",
    params(("id" = String, Path, description = "Order reference")),
    responses(
        (status = 200, description = "Seller order lines", body = [SellerOrderDetails]),
        (status = 403, description = "Caller is not a seller", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found for this seller", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_seller_order(
    State(state): State<AppState>,
    seller: SellerUser,
    Path(order_ref): Path<String>,
) -> ApiResult<Vec<SellerOrderDetails>> {
    let rows = state
        .services
        .orders
        .get_seller_order(seller.seller_id(), &order_ref)
        .await?;
    Ok(Json(ApiResponse::with_message(
        rows,
        "Order fetched successfully",
    )))
}
