//! Mercado Pago REST client.
//!
//! Wraps the preference, payment and refund endpoints behind typed calls.
//! Every request carries the bearer token; a non-2xx answer becomes
//! [`GatewayError::Api`] with the status and the most useful message found in
//! the body. Retries are left to callers.

use crate::config::GatewayConfig;
use crate::services::metrics;
use reqwest::{Client, Method};
use rust_decimal::{Decimal, RoundingStrategy};
use secrecy::{ExposeSecret, Secret};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway access token is not configured")]
    MissingCredential,

    #[error("payment gateway returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("payment gateway request timed out")]
    Timeout,

    #[error("payment gateway transport error: {0}")]
    Transport(reqwest::Error),

    #[error("unexpected payment gateway response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err)
        }
    }
}

impl GatewayError {
    /// HTTP status reported by the gateway, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Booking context attached to preferences and payments, echoed back by the
/// gateway on every payment fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceItem {
    pub id: String,
    pub title: String,
    pub quantity: u32,
    pub currency_id: String,
    #[serde(serialize_with = "serialize_amount")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub pending: String,
    pub failure: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayerInfo {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceRequest {
    pub items: Vec<PreferenceItem>,
    pub metadata: PaymentMetadata,
    pub back_urls: BackUrls,
    pub auto_return: String,
    pub external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<PayerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Preference {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub init_point: Option<String>,
    #[serde(default)]
    pub sandbox_init_point: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequest {
    #[serde(serialize_with = "serialize_amount")]
    pub transaction_amount: Decimal,
    pub token: String,
    pub description: String,
    pub installments: u32,
    pub payment_method_id: String,
    pub payer: PayerInfo,
    pub capture: bool,
    pub external_reference: String,
    pub metadata: PaymentMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionDetails {
    #[serde(default)]
    pub external_resource_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Payment {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub transaction_amount: Option<Decimal>,
    #[serde(default)]
    pub currency_id: Option<String>,
    #[serde(default)]
    pub captured: Option<bool>,
    #[serde(default)]
    pub metadata: PaymentMetadata,
    #[serde(default)]
    pub preference_id: Option<String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub transaction_details: Option<TransactionDetails>,
}

impl Payment {
    pub fn receipt_url(&self) -> Option<String> {
        self.receipt_url.clone().or_else(|| {
            self.transaction_details
                .as_ref()
                .and_then(|d| d.external_resource_url.clone())
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Refund {
    pub fn is_approved(&self) -> bool {
        self.status.as_deref() == Some("approved")
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Authenticated client for the payment gateway.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    access_token: Option<Secret<String>>,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    /// Check if an access token is configured.
    pub fn is_configured(&self) -> bool {
        self.access_token
            .as_ref()
            .map(|t| !t.expose_secret().is_empty())
            .unwrap_or(false)
    }

    /// Issue a request and return the body as JSON, or as a JSON string when
    /// the body is not JSON.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        idempotency_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let token = self
            .access_token
            .as_ref()
            .map(|t| t.expose_secret())
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::MissingCredential)?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(key) = idempotency_key {
            request = request.header(IDEMPOTENCY_HEADER, key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        tracing::debug!(method = %method, path = %path, status = %status, "Gateway response");

        let parsed = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if status.is_success() {
            Ok(parsed)
        } else {
            let message = extract_error_message(&parsed);
            tracing::warn!(
                method = %method,
                path = %path,
                status = status.as_u16(),
                message = %message,
                "Gateway request failed"
            );
            Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<&Value>,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let result = self
            .request(method, path, body, idempotency_key)
            .await
            .and_then(|value| serde_json::from_value::<T>(value).map_err(GatewayError::from));

        metrics::record_gateway_call(operation, if result.is_ok() { "ok" } else { "error" });
        result
    }

    pub async fn create_preference(
        &self,
        request: &PreferenceRequest,
        idempotency_key: &str,
    ) -> Result<Preference, GatewayError> {
        let body = serde_json::to_value(request)?;
        self.call(
            "create_preference",
            Method::POST,
            "/checkout/preferences",
            Some(&body),
            Some(idempotency_key),
        )
        .await
    }

    pub async fn create_payment(
        &self,
        request: &PaymentRequest,
        idempotency_key: &str,
    ) -> Result<Payment, GatewayError> {
        let body = serde_json::to_value(request)?;
        self.call(
            "create_payment",
            Method::POST,
            "/v1/payments",
            Some(&body),
            Some(idempotency_key),
        )
        .await
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Payment, GatewayError> {
        self.call(
            "get_payment",
            Method::GET,
            &format!("/v1/payments/{}", payment_id),
            None,
            None,
        )
        .await
    }

    /// Capture an authorized payment. `None` captures the full authorized amount.
    pub async fn capture_payment(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<Payment, GatewayError> {
        let mut body = json!({ "capture": true });
        if let Some(amount) = amount {
            body["transaction_amount"] = decimal_to_json(amount);
        }

        self.call(
            "capture_payment",
            Method::PUT,
            &format!("/v1/payments/{}", payment_id),
            Some(&body),
            None,
        )
        .await
    }

    /// Release an authorization hold without charging.
    pub async fn cancel_payment(&self, payment_id: &str) -> Result<Payment, GatewayError> {
        let body = json!({ "status": "cancelled" });
        self.call(
            "cancel_payment",
            Method::PUT,
            &format!("/v1/payments/{}", payment_id),
            Some(&body),
            None,
        )
        .await
    }

    /// Refund a captured payment, fully when `amount` is `None`.
    pub async fn create_refund(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
        idempotency_key: &str,
    ) -> Result<Refund, GatewayError> {
        let body = match amount {
            Some(amount) => json!({ "amount": decimal_to_json(amount) }),
            None => json!({}),
        };

        self.call(
            "create_refund",
            Method::POST,
            &format!("/v1/payments/{}/refunds", payment_id),
            Some(&body),
            Some(idempotency_key),
        )
        .await
    }
}

/// The gateway takes amounts in cents precision.
fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn serialize_amount<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    rust_decimal::serde::float::serialize(&to_cents(*amount), serializer)
}

fn decimal_to_json(amount: Decimal) -> Value {
    let amount = rust_decimal::prelude::ToPrimitive::to_f64(&to_cents(amount));
    serde_json::to_value(amount).unwrap_or(Value::Null)
}

/// Best-effort human message from an error body: `message`, then `error`,
/// then the raw text.
fn extract_error_message(body: &Value) -> String {
    match body {
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| map.get("error").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str, token: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            api_base_url: base_url.to_string(),
            access_token: token.map(|t| Secret::new(t.to_string())),
            timeout_seconds: 5,
            webhook_secret: None,
            allow_unsigned_webhooks: false,
        }
    }

    #[test]
    fn test_extract_error_message_priority() {
        assert_eq!(
            extract_error_message(&json!({ "message": "bad token", "error": "unauthorized" })),
            "bad token"
        );
        assert_eq!(
            extract_error_message(&json!({ "error": "not_found" })),
            "not_found"
        );
        assert_eq!(
            extract_error_message(&Value::String("Bad Gateway".to_string())),
            "Bad Gateway"
        );
    }

    #[test]
    fn test_amounts_leave_in_cents() {
        assert_eq!(decimal_to_json(dec!(4.9995)), json!(5.0));
        assert_eq!(decimal_to_json(dec!(15.015)), json!(15.02));

        let item = PreferenceItem {
            id: "bk-1".to_string(),
            title: "Tour".to_string(),
            quantity: 1,
            currency_id: "BRL".to_string(),
            unit_price: dec!(28.3305),
        };
        assert_eq!(serde_json::to_value(&item).unwrap()["unit_price"], json!(28.33));
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_any_request() {
        let server = MockServer::start().await;
        let client = GatewayClient::new(&config(&server.uri(), None)).unwrap();

        let err = client.get_payment("1").await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredential));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_payment_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/123"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 123,
                "status": "approved",
                "transaction_amount": 99.9,
                "metadata": { "booking_id": "bk-1", "asset_type": "activity" }
            })))
            .mount(&server)
            .await;

        let client = GatewayClient::new(&config(&server.uri(), Some("test-token"))).unwrap();
        let payment = client.get_payment("123").await.unwrap();

        assert_eq!(payment.id, "123");
        assert_eq!(payment.status, "approved");
        assert_eq!(payment.metadata.booking_id.as_deref(), Some("bk-1"));
        assert_eq!(payment.transaction_amount, Some(dec!(99.9)));
    }

    #[tokio::test]
    async fn test_non_success_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/404"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({ "message": "Payment not found", "status": 404 })),
            )
            .mount(&server)
            .await;

        let client = GatewayClient::new(&config(&server.uri(), Some("t"))).unwrap();
        let err = client.get_payment("404").await.unwrap_err();

        match err {
            GatewayError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Payment not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_text_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/payments/9"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let client = GatewayClient::new(&config(&server.uri(), Some("t"))).unwrap();
        let err = client.cancel_payment("9").await.unwrap_err();

        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_capture_with_partial_amount() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/payments/77"))
            .and(body_json(json!({ "capture": true, "transaction_amount": 50.5 })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": 77, "status": "approved" })),
            )
            .mount(&server)
            .await;

        let client = GatewayClient::new(&config(&server.uri(), Some("t"))).unwrap();
        let payment = client.capture_payment("77", Some(dec!(50.50))).await.unwrap();
        assert_eq!(payment.status, "approved");
    }

    #[tokio::test]
    async fn test_create_preference_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .and(header(IDEMPOTENCY_HEADER, "pref-activity-bk-1"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "pref-123",
                "init_point": "https://www.mercadopago.com/checkout?pref=pref-123",
                "sandbox_init_point": "https://sandbox.mercadopago.com/checkout?pref=pref-123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = GatewayClient::new(&config(&server.uri(), Some("t"))).unwrap();
        let request = PreferenceRequest {
            items: vec![PreferenceItem {
                id: "bk-1".to_string(),
                title: "Boat tour".to_string(),
                quantity: 1,
                currency_id: "BRL".to_string(),
                unit_price: dec!(180.00),
            }],
            metadata: PaymentMetadata {
                booking_id: Some("bk-1".to_string()),
                ..Default::default()
            },
            back_urls: BackUrls {
                success: "https://app/success".to_string(),
                pending: "https://app/pending".to_string(),
                failure: "https://app/failure".to_string(),
            },
            auto_return: "approved".to_string(),
            external_reference: "bk-1".to_string(),
            notification_url: None,
            payer: None,
        };

        let preference = client
            .create_preference(&request, "pref-activity-bk-1")
            .await
            .unwrap();
        assert_eq!(preference.id, "pref-123");
        assert!(preference.sandbox_init_point.is_some());
    }
}
