#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use checkout_service::config::{
    CheckoutConfig, CheckoutUrls, CollaboratorConfig, GatewayConfig, MongoConfig,
};
use checkout_service::services::memory::{
    InMemoryAssetPermissions, InMemoryBookingRepository, InMemoryCouponStore,
    InMemoryWebhookEventStore,
};
use checkout_service::services::{
    CouponEngine, GatewayClient, PaymentOrchestrator, WebhookVerifier,
};
use checkout_service::{build_router, AppState};
use http_body_util::BodyExt;
use secrecy::Secret;
use serde_json::Value;
use service_core::utils::signature::hmac_sha256_hex;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::MockServer;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const MASTER: &[(&str, &str)] = &[("X-User-ID", "master-1"), ("X-User-Role", "master")];
pub const PARTNER_A: &[(&str, &str)] = &[("X-User-ID", "partner-a"), ("X-User-Role", "partner")];
pub const PARTNER_B: &[(&str, &str)] = &[("X-User-ID", "partner-b"), ("X-User-Role", "partner")];
pub const CUSTOMER: &[(&str, &str)] = &[("X-User-ID", "user-1"), ("X-User-Role", "customer")];

pub struct TestApp {
    pub router: Router,
    pub gateway: MockServer,
    pub bookings: Arc<InMemoryBookingRepository>,
    pub events: Arc<InMemoryWebhookEventStore>,
    pub permissions: Arc<InMemoryAssetPermissions>,
    pub coupons: CouponEngine,
}

fn test_config(gateway_url: String, access_token: Option<&str>) -> CheckoutConfig {
    CheckoutConfig {
        common: service_core::config::Config::default(),
        mongodb: MongoConfig {
            uri: Secret::new("mongodb://localhost:27017".to_string()),
            database: "checkout_test".to_string(),
        },
        gateway: GatewayConfig {
            api_base_url: gateway_url,
            access_token: access_token.map(|t| Secret::new(t.to_string())),
            timeout_seconds: 5,
            webhook_secret: Some(Secret::new(WEBHOOK_SECRET.to_string())),
            allow_unsigned_webhooks: false,
        },
        checkout: CheckoutUrls {
            notification_url: Some("https://checkout.test/webhooks/mercadopago".to_string()),
            success_url: "https://app.test/success".to_string(),
            pending_url: "https://app.test/pending".to_string(),
            failure_url: "https://app.test/failure".to_string(),
            currency: "BRL".to_string(),
        },
        collaborators: CollaboratorConfig::default(),
        service_name: "checkout-service-test".to_string(),
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_token(Some("test-access-token")).await
    }

    /// App over in-memory stores with a wiremock server standing in for the gateway.
    pub async fn spawn_with_token(access_token: Option<&str>) -> Self {
        let gateway = MockServer::start().await;
        let config = test_config(gateway.uri(), access_token);

        let bookings = Arc::new(InMemoryBookingRepository::new());
        let events = Arc::new(InMemoryWebhookEventStore::new());
        let permissions = Arc::new(InMemoryAssetPermissions::new());
        let coupons = CouponEngine::new(Arc::new(InMemoryCouponStore::new()), permissions.clone());

        let client = GatewayClient::new(&config.gateway).expect("Failed to build gateway client");
        let payments = PaymentOrchestrator::new(
            client,
            bookings.clone(),
            events.clone(),
            permissions.clone(),
            coupons.clone(),
            Vec::new(),
            config.checkout.clone(),
        );
        let verifier = WebhookVerifier::new(
            config.gateway.webhook_secret.clone(),
            config.gateway.allow_unsigned_webhooks,
        );

        let state = AppState {
            config,
            coupons: coupons.clone(),
            payments: Arc::new(payments),
            verifier,
            db: None,
        };

        TestApp {
            router: build_router(state),
            gateway,
            bookings,
            events,
            permissions,
            coupons,
        }
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("Failed to build request"))
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, json)
    }
}

/// `x-signature` header for the `id:{id};topic:{topic};ts:{ts}` message.
pub fn signature(id: &str, topic: &str, ts: &str) -> String {
    let message = format!("id:{};topic:{};ts:{}", id, topic, ts);
    let v1 = hmac_sha256_hex(WEBHOOK_SECRET, &message).expect("Failed to sign");
    format!("ts={},v1={}", ts, v1)
}

pub fn decimal(value: &Value) -> rust_decimal::Decimal {
    match value {
        Value::String(s) => s.parse().expect("Not a decimal string"),
        other => other.to_string().parse().expect("Not a decimal"),
    }
}
