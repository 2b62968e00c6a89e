mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/health", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"]["status"], "up");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/transactions/payment"].is_object());
}
