//! Mercado Pago notification endpoint.
//!
//! Answers 401 on a failed signature, 200 once the event is processed or was
//! already processed, and 500 on a processing failure so the gateway redelivers.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use service_core::middleware::tracing::GeneratedRequestId;
use std::collections::HashMap;

use crate::{
    models::WebhookNotification,
    services::{
        webhook_verifier::{REQUEST_ID_HEADER, SIGNATURE_HEADER},
        PaymentError, SignedRequest, WebhookOutcome,
    },
    AppState,
};

/// Lowercased headers and the query. A request id minted by our own
/// middleware is left out: it is neither signed nor stable across redeliveries.
fn signed_request(
    query: HashMap<String, String>,
    headers: &HeaderMap,
    generated_request_id: bool,
) -> SignedRequest {
    let headers = headers
        .iter()
        .filter(|(name, _)| !(generated_request_id && name.as_str() == REQUEST_ID_HEADER))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    SignedRequest { query, headers }
}

/// Legacy notifications may arrive as `?topic=payment&id=<payment id>` with an
/// empty body.
fn merge_query(payload: &mut Value, query: &HashMap<String, String>) {
    let Value::Object(map) = payload else {
        return;
    };
    for key in ["type", "topic"] {
        if let Some(value) = query.get(key) {
            map.entry(key).or_insert_with(|| json!(value));
        }
    }
    if !map.contains_key("id") && !map.contains_key("resource") {
        if let Some(id) = query.get("id") {
            map.insert("resource".to_string(), json!(id));
        }
    }
}

pub async fn mercadopago(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    generated: Option<Extension<GeneratedRequestId>>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<WebhookOutcome>), AppError> {
    let request = signed_request(query, &headers, generated.is_some());
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if !state.verifier.verify(signature, &request) {
        tracing::warn!("Rejected webhook with invalid signature");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let mut payload: Value = if body.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, "Webhook body is not JSON");
            AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload"))
        })?
    };
    merge_query(&mut payload, &request.query);

    let notification = WebhookNotification::new(payload)
        .with_delivery_id(request.headers.get(REQUEST_ID_HEADER).cloned());

    match state.payments.process_webhook(&notification).await {
        Ok(outcome) => Ok((StatusCode::OK, Json(outcome))),
        Err(PaymentError::MissingEventId) => Err(AppError::BadRequest(anyhow::anyhow!(
            "Notification carries no event id"
        ))),
        Err(e) => {
            tracing::error!(error = %e, "Webhook processing failed");
            Err(AppError::InternalError(anyhow::anyhow!(
                "Webhook processing failed"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_query_becomes_resource() {
        let query = HashMap::from([
            ("topic".to_string(), "payment".to_string()),
            ("id".to_string(), "555".to_string()),
        ]);
        let mut payload = json!({});
        merge_query(&mut payload, &query);

        let notification =
            WebhookNotification::new(payload).with_delivery_id(Some("req-1".to_string()));
        assert_eq!(notification.payment_id().as_deref(), Some("555"));
        assert_eq!(notification.event_id().as_deref(), Some("payment:555:req-1"));
    }

    #[test]
    fn test_generated_request_id_is_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "minted".parse().unwrap());
        headers.insert("x-signature", "ts=1,v1=ab".parse().unwrap());

        let minted = signed_request(HashMap::new(), &headers, true);
        assert!(!minted.headers.contains_key(REQUEST_ID_HEADER));
        assert!(minted.headers.contains_key("x-signature"));

        let sent = signed_request(HashMap::new(), &headers, false);
        assert_eq!(sent.headers.get(REQUEST_ID_HEADER).map(String::as_str), Some("minted"));
    }

    #[test]
    fn test_body_fields_win_over_query() {
        let query = HashMap::from([
            ("type".to_string(), "merchant_order".to_string()),
            ("id".to_string(), "1".to_string()),
        ]);
        let mut payload = json!({ "id": "evt-9", "type": "payment", "data": { "id": "2" } });
        merge_query(&mut payload, &query);

        assert_eq!(payload["type"], "payment");
        assert_eq!(payload["id"], "evt-9");
        assert!(payload.get("resource").is_none());
    }
}
