mod common;

use axum::http::StatusCode;
use common::TestApp;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let (status, body) = app.request("GET", "/health", &[], None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "checkout-service");
}

#[tokio::test]
async fn readiness_without_database_is_ready() {
    let app = TestApp::spawn().await;

    let (status, body) = app.request("GET", "/ready", &[], None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn metrics_endpoint_responds() {
    let app = TestApp::spawn().await;

    let (status, _) = app.request("GET", "/metrics", &[], None).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_require_identity_headers() {
    let app = TestApp::spawn().await;

    let (status, _) = app.request("GET", "/coupons/anything", &[], None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
