mod common;

use axum::http::StatusCode;
use checkout_service::models::{AssetType, BookingRecord, BookingStatus, PaymentStatus};
use checkout_service::services::store::{BookingRepository, WebhookEventStore};
use common::{signature, TestApp, MASTER};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const TS: &str = "1700000000000";

async fn mount_payment(app: &TestApp, payment_id: &str, status: &str, booking_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/payments/{}", payment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": payment_id.parse::<u64>().unwrap(),
            "status": status,
            "metadata": { "booking_id": booking_id, "asset_type": "event" }
        })))
        .mount(&app.gateway)
        .await;
}

async fn seed_booking(app: &TestApp, id: &str, status: PaymentStatus, payment_id: Option<&str>) {
    let mut booking = BookingRecord::new(id);
    booking.payment_status = status;
    booking.mp_payment_id = payment_id.map(str::to_string);
    app.bookings.insert(AssetType::Event, booking).await;
}

fn notification(event_id: &str, payment_id: &str) -> serde_json::Value {
    json!({
        "id": event_id,
        "type": "payment",
        "action": "payment.updated",
        "live_mode": false,
        "data": { "id": payment_id }
    })
}

fn signed_headers(payment_id: &str) -> Vec<(&'static str, String)> {
    vec![("x-signature", signature(payment_id, "payment", TS))]
}

async fn deliver(
    app: &TestApp,
    event_id: &str,
    payment_id: &str,
) -> (StatusCode, serde_json::Value) {
    let headers = signed_headers(payment_id);
    let headers: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();
    app.request(
        "POST",
        &format!("/webhooks/mercadopago?data.id={}&type=payment", payment_id),
        &headers,
        Some(notification(event_id, payment_id)),
    )
    .await
}

#[tokio::test]
async fn unsigned_notification_is_unauthorized() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .request(
            "POST",
            "/webhooks/mercadopago?data.id=1&type=payment",
            &[],
            Some(notification("evt-1", "1")),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.events.get("evt-1").await.unwrap().is_none());
}

#[tokio::test]
async fn tampered_signature_is_unauthorized() {
    let app = TestApp::spawn().await;
    let mut header = signature("1", "payment", TS);
    let last = header.pop().unwrap();
    header.push(if last == '0' { '1' } else { '0' });

    let (status, _) = app
        .request(
            "POST",
            "/webhooks/mercadopago?data.id=1&type=payment",
            &[("x-signature", header.as_str())],
            Some(notification("evt-1", "1")),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn approved_payment_updates_booking_once() {
    let app = TestApp::spawn().await;
    seed_booking(&app, "bk-1", PaymentStatus::Pending, None).await;
    mount_payment(&app, "321", "approved", "bk-1").await;

    let (status, body) = deliver(&app, "evt-1", "321").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    assert_eq!(body["bookingId"], "bk-1");
    assert_eq!(body["paymentStatus"], "paid");

    let (status, body) = deliver(&app, "evt-1", "321").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_processed");

    let booking = app.bookings.find(AssetType::Event, "bk-1").await.unwrap().unwrap();
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert_eq!(booking.mp_payment_id.as_deref(), Some("321"));

    let requests = app.gateway.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn unknown_payment_is_acknowledged() {
    let app = TestApp::spawn().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/999"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Payment not found" })),
        )
        .mount(&app.gateway)
        .await;

    let (status, body) = deliver(&app, "evt-404", "999").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(app.events.get("evt-404").await.unwrap().unwrap().processed);
}

#[tokio::test]
async fn processing_failure_asks_for_redelivery() {
    let app = TestApp::spawn_with_token(None).await;

    let (status, _) = deliver(&app, "evt-500", "42").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let event = app.events.get("evt-500").await.unwrap().unwrap();
    assert!(!event.processed);
    assert_eq!(event.processing_errors.len(), 1);

    let (status, _) = deliver(&app, "evt-500", "42").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let event = app.events.get("evt-500").await.unwrap().unwrap();
    assert_eq!(event.processing_errors[1].retry_count, 1);
}

#[tokio::test]
async fn approve_booking_captures_before_confirming() {
    let app = TestApp::spawn().await;
    seed_booking(&app, "bk-7", PaymentStatus::Authorized, Some("700")).await;
    Mock::given(method("PUT"))
        .and(path("/v1/payments/700"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": 700, "status": "approved" })),
        )
        .expect(1)
        .mount(&app.gateway)
        .await;

    let (status, body) = app
        .request("POST", "/bookings/event/bk-7/approve", MASTER, None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");
    assert_eq!(body["paymentStatus"], "paid");
}

#[tokio::test]
async fn failed_capture_returns_bad_gateway_and_keeps_booking() {
    let app = TestApp::spawn().await;
    seed_booking(&app, "bk-8", PaymentStatus::Authorized, Some("800")).await;
    Mock::given(method("PUT"))
        .and(path("/v1/payments/800"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "message": "internal detail" })),
        )
        .mount(&app.gateway)
        .await;

    let (status, body) = app
        .request("POST", "/bookings/event/bk-8/approve", MASTER, None)
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(!body.to_string().contains("internal detail"));

    let booking = app.bookings.find(AssetType::Event, "bk-8").await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Authorized);
}

#[tokio::test]
async fn customers_cannot_decide_bookings() {
    let app = TestApp::spawn().await;

    let (status, _) = app
        .request("POST", "/bookings/event/bk-1/approve", common::CUSTOMER, None)
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn legacy_redelivery_without_request_id_is_deduplicated() {
    let app = TestApp::spawn().await;
    seed_booking(&app, "bk-5", PaymentStatus::Pending, None).await;
    mount_payment(&app, "555", "approved", "bk-5").await;

    let header = signature("555", "payment", TS);
    let headers = [("x-signature", header.as_str())];
    let uri = "/webhooks/mercadopago?topic=payment&id=555";

    let (status, body) = app.request("POST", uri, &headers, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");

    let (status, body) = app.request("POST", uri, &headers, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_processed");

    assert!(app.events.get("payment:555").await.unwrap().unwrap().processed);
    assert_eq!(app.gateway.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn legacy_notifications_with_gateway_request_ids_are_distinct() {
    let app = TestApp::spawn().await;
    seed_booking(&app, "bk-6", PaymentStatus::Pending, None).await;
    mount_payment(&app, "556", "approved", "bk-6").await;

    let header = signature("556", "payment", TS);
    let uri = "/webhooks/mercadopago?topic=payment&id=556";

    for request_id in ["req-1", "req-2"] {
        let headers = [("x-signature", header.as_str()), ("x-request-id", request_id)];
        let (status, body) = app.request("POST", uri, &headers, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processed");
    }

    assert!(app.events.get("payment:556:req-2").await.unwrap().is_some());
}

#[tokio::test]
async fn late_authorized_event_converges_on_gateway_status() {
    let app = TestApp::spawn().await;
    seed_booking(&app, "bk-9", PaymentStatus::Pending, None).await;
    // The gateway already reports the payment as approved when the
    // earlier `authorized` notification finally arrives.
    mount_payment(&app, "900", "approved", "bk-9").await;

    let (status, body) = deliver(&app, "evt-approved", "900").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paymentStatus"], "paid");

    let (status, body) = deliver(&app, "evt-authorized", "900").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    assert_eq!(body["paymentStatus"], "paid");

    let booking = app.bookings.find(AssetType::Event, "bk-9").await.unwrap().unwrap();
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert_eq!(app.gateway.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn partners_cannot_decide_other_partners_bookings() {
    let app = TestApp::spawn().await;
    let mut booking = BookingRecord::new("bk-11");
    booking.payment_status = PaymentStatus::Paid;
    booking.mp_payment_id = Some("1100".to_string());
    booking.partner_id = Some("partner-a".to_string());
    app.bookings.insert(AssetType::Event, booking).await;

    let (status, _) = app
        .request("POST", "/bookings/event/bk-11/reject", common::PARTNER_B, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request("POST", "/payments/1100/refunds", common::PARTNER_B, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .request("POST", "/bookings/event/bk-11/approve", common::PARTNER_A, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");
    assert!(app.gateway.received_requests().await.unwrap().is_empty());
}
