mod common;

use axum::http::StatusCode;
use common::{body_json, TestApp};
use marketplace_api::gateway::Settlement;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Buyer purchases one item from each of two sellers; returns the order ref.
async fn place_order(app: &TestApp, buyer: Uuid, seller_a: Uuid, seller_b: Uuid) -> String {
    let token = app.buyer_token(buyer);
    let book = app.seed_product("book", dec!(8.00), seller_a, 10).await;
    let cup = app.seed_product("cup", dec!(4.00), seller_b, 10).await;
    app.add_to_cart(&token, book.id, 1).await;
    app.add_to_cart(&token, cup.id, 2).await;

    let response = app.get("/transactions/payment", &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let record = app.settle_current(buyer, Settlement::Succeeded).await;
    let body = body_json(app.get("/transactions/payment/verify", &token).await).await;
    assert_eq!(body["data"]["status"], "succeeded");
    record.order_ref
}

#[tokio::test]
async fn seller_sees_only_their_lines() {
    let app = TestApp::new().await;
    let buyer = Uuid::new_v4();
    let seller_a = Uuid::new_v4();
    let seller_b = Uuid::new_v4();
    let order_ref = place_order(&app, buyer, seller_a, seller_b).await;

    let token = app.seller_token(seller_a);
    let body = body_json(app.get("/transactions/seller/orders", &token).await).await;
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "book");
    assert_eq!(rows[0]["order_ref"], order_ref.as_str());
    assert_eq!(rows[0]["customer_id"], buyer.to_string());

    let response = app
        .get(&format!("/transactions/seller/orders/{}", order_ref), &token)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn seller_without_lines_in_order_gets_not_found() {
    let app = TestApp::new().await;
    let order_ref = place_order(&app, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()).await;

    let stranger = app.seller_token(Uuid::new_v4());
    let response = app
        .get(&format!("/transactions/seller/orders/{}", order_ref), &stranger)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn seller_routes_require_seller_role() {
    let app = TestApp::new().await;
    let buyer_token = app.buyer_token(Uuid::new_v4());

    let response = app.get("/transactions/seller/orders", &buyer_token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn buyer_order_lookup_is_scoped_to_owner() {
    let app = TestApp::new().await;
    let buyer = Uuid::new_v4();
    let order_ref = place_order(&app, buyer, Uuid::new_v4(), Uuid::new_v4()).await;

    let owner = app.buyer_token(buyer);
    let response = app.get(&format!("/users/order/{}", order_ref), &owner).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);

    let other = app.buyer_token(Uuid::new_v4());
    let response = app.get(&format!("/users/order/{}", order_ref), &other).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
