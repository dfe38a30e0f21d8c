mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{decimal, TestApp, CUSTOMER, MASTER, PARTNER_A, PARTNER_B};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

fn coupon_body(code: &str, discount_type: &str, value: &str) -> Value {
    let now = Utc::now();
    json!({
        "code": code,
        "name": format!("{} promo", code),
        "discountType": discount_type,
        "discountValue": value,
        "validFrom": (now - Duration::days(1)).to_rfc3339(),
        "validUntil": (now + Duration::days(30)).to_rfc3339(),
        "globalApplication": { "isGlobal": true, "assetTypes": ["activity", "event"] }
    })
}

fn apply_body(code: &str, booking_id: &str, amount: &str) -> Value {
    json!({
        "code": code,
        "bookingId": booking_id,
        "bookingType": "activity",
        "originalAmount": amount
    })
}

#[tokio::test]
async fn create_then_fetch_coupon() {
    let app = TestApp::spawn().await;

    let (status, created) = app
        .request("POST", "/coupons", MASTER, Some(coupon_body("save10", "percentage", "10")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["code"], "SAVE10");
    assert_eq!(created["usageCount"], 0);

    let id = created["_id"].as_str().unwrap();
    let (status, fetched) = app
        .request("GET", &format!("/coupons/{}", id), MASTER, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["code"], "SAVE10");
}

#[tokio::test]
async fn duplicate_code_is_a_conflict() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .request("POST", "/coupons", MASTER, Some(coupon_body("ONCE", "percentage", "5")))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .request("POST", "/coupons", MASTER, Some(coupon_body("once", "percentage", "5")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_window_is_rejected() {
    let app = TestApp::spawn().await;
    let mut body = coupon_body("BACKWARDS", "percentage", "10");
    body["validUntil"] = json!((Utc::now() - Duration::days(5)).to_rfc3339());

    let (status, _) = app.request("POST", "/coupons", MASTER, Some(body)).await;

    assert!(status.is_client_error());
}

#[tokio::test]
async fn validate_previews_without_recording() {
    let app = TestApp::spawn().await;
    let (_, created) = app
        .request("POST", "/coupons", MASTER, Some(coupon_body("SAVE10", "percentage", "10")))
        .await;

    let (status, quote) = app
        .request(
            "POST",
            "/coupons/validate",
            CUSTOMER,
            Some(apply_body("SAVE10", "bk-1", "200.00")),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&quote["discountAmount"]), dec!(20));
    assert_eq!(decimal(&quote["finalAmount"]), dec!(180));

    let id = created["_id"].as_str().unwrap();
    let (_, usages) = app
        .request("GET", &format!("/coupons/{}/usages", id), MASTER, None)
        .await;
    assert_eq!(usages.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn second_apply_to_same_booking_conflicts() {
    let app = TestApp::spawn().await;
    let (_, created) = app
        .request("POST", "/coupons", MASTER, Some(coupon_body("FLAT50", "fixed_amount", "50")))
        .await;

    let (status, usage) = app
        .request("POST", "/coupons/apply", CUSTOMER, Some(apply_body("FLAT50", "bk-1", "30.00")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(usage["userId"], "user-1");
    assert_eq!(decimal(&usage["discountAmount"]), dec!(30));
    assert_eq!(decimal(&usage["finalAmount"]), dec!(0));

    let (status, _) = app
        .request("POST", "/coupons/apply", CUSTOMER, Some(apply_body("FLAT50", "bk-1", "30.00")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let id = created["_id"].as_str().unwrap();
    let (_, coupon) = app
        .request("GET", &format!("/coupons/{}", id), MASTER, None)
        .await;
    assert_eq!(coupon["usageCount"], 1);
}

#[tokio::test]
async fn refund_releases_the_usage_slot() {
    let app = TestApp::spawn().await;
    let mut body = coupon_body("SINGLE", "percentage", "10");
    body["usageLimit"] = json!(1);
    let (_, created) = app.request("POST", "/coupons", MASTER, Some(body)).await;
    let coupon_id = created["_id"].as_str().unwrap().to_string();

    let (_, usage) = app
        .request("POST", "/coupons/apply", CUSTOMER, Some(apply_body("SINGLE", "bk-1", "100")))
        .await;

    let (status, _) = app
        .request("POST", "/coupons/apply", CUSTOMER, Some(apply_body("SINGLE", "bk-2", "100")))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let usage_id = usage["_id"].as_str().unwrap();
    let (status, refunded) = app
        .request(
            "POST",
            &format!("/coupon-usages/{}/refund", usage_id),
            MASTER,
            Some(json!({ "reason": "trip cancelled" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refunded["status"], "refunded");

    let (status, _) = app
        .request(
            "POST",
            &format!("/coupon-usages/{}/refund", usage_id),
            MASTER,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, coupon) = app
        .request("GET", &format!("/coupons/{}", coupon_id), MASTER, None)
        .await;
    assert_eq!(coupon["usageCount"], 0);

    let (_, audit) = app
        .request("GET", &format!("/coupons/{}/audit", coupon_id), MASTER, None)
        .await;
    let actions: Vec<&str> = audit
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|entry| entry["actionType"].as_str())
        .collect();
    assert!(actions.contains(&"applied"));
    assert!(actions.contains(&"refunded"));
}

#[tokio::test]
async fn partners_only_manage_their_own_coupons() {
    let app = TestApp::spawn().await;
    let (status, created) = app
        .request("POST", "/coupons", PARTNER_A, Some(coupon_body("PARTNERA", "percentage", "15")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["partnerId"], "partner-a");
    let id = created["_id"].as_str().unwrap();

    let (status, _) = app
        .request(
            "POST",
            &format!("/coupons/{}/toggle", id),
            PARTNER_B,
            Some(json!({ "isActive": false })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, toggled) = app
        .request(
            "POST",
            &format!("/coupons/{}/toggle", id),
            PARTNER_A,
            Some(json!({ "isActive": false, "reason": "season over" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["isActive"], false);
}

#[tokio::test]
async fn deleted_coupon_is_not_found() {
    let app = TestApp::spawn().await;
    let (_, created) = app
        .request("POST", "/coupons", MASTER, Some(coupon_body("GONE", "percentage", "10")))
        .await;
    let id = created["_id"].as_str().unwrap();

    let (status, _) = app
        .request("DELETE", &format!("/coupons/{}?reason=typo", id), MASTER, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request("GET", &format!("/coupons/{}", id), MASTER, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_reports_each_coupon() {
    let app = TestApp::spawn().await;
    let (_, created) = app
        .request("POST", "/coupons", MASTER, Some(coupon_body("BULK1", "percentage", "10")))
        .await;
    let id = created["_id"].as_str().unwrap();

    let (status, body) = app
        .request(
            "POST",
            "/coupons/bulk",
            MASTER,
            Some(json!({ "couponIds": [id, "missing"], "action": "deactivate" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"].is_string());
}

#[tokio::test]
async fn duplicate_starts_inactive() {
    let app = TestApp::spawn().await;
    let (_, created) = app
        .request("POST", "/coupons", MASTER, Some(coupon_body("ORIGINAL", "percentage", "10")))
        .await;
    let id = created["_id"].as_str().unwrap();

    let (status, copy) = app
        .request(
            "POST",
            &format!("/coupons/{}/duplicate", id),
            MASTER,
            Some(json!({ "code": "copy-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(copy["code"], "COPY-1");
    assert_eq!(copy["isActive"], false);
    assert_eq!(copy["usageCount"], 0);
}

#[tokio::test]
async fn expiry_sweep_is_master_only() {
    let app = TestApp::spawn().await;

    let (status, _) = app.request("POST", "/coupons/expire", PARTNER_A, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.request("POST", "/coupons/expire", MASTER, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expired"], json!([]));
}
