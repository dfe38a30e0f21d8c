use super::booking::AssetType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Diagnostic record of a failed processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingError {
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

/// Minimal projection of an inbound payload kept for later inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSnapshot {
    pub id: String,
    pub status: Option<String>,
    pub payment_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
}

impl PayloadSnapshot {
    /// Pick the handful of fields worth keeping out of a raw gateway payload.
    pub fn from_raw(event_id: &str, raw: &Value) -> Self {
        let data = raw.get("data");
        let payment_id = data
            .and_then(|d| d.get("id"))
            .and_then(id_as_string)
            .or_else(|| raw.get("resource").and_then(id_as_string).map(|r| resource_id(&r)));

        Self {
            id: event_id.to_string(),
            status: first_str(raw, data, "status"),
            payment_id,
            amount: data
                .and_then(|d| d.get("transaction_amount"))
                .or_else(|| raw.get("transaction_amount"))
                .and_then(Value::as_f64)
                .and_then(|f| Decimal::try_from(f).ok()),
            currency: first_str(raw, data, "currency_id"),
        }
    }
}

fn first_str(raw: &Value, data: Option<&Value>, key: &str) -> Option<String> {
    data.and_then(|d| d.get(key))
        .or_else(|| raw.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Gateway ids arrive as numbers or strings depending on the payload version.
pub fn id_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Legacy notifications sometimes send a resource URL instead of a bare id.
fn resource_id(resource: &str) -> String {
    resource
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(resource)
        .to_string()
}

/// Entities a processed event turned out to concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RelatedEntities {
    pub booking_id: Option<String>,
    pub asset_type: Option<AssetType>,
    pub asset_id: Option<String>,
}

/// Idempotency record for one gateway event id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEventRecord {
    pub mp_event_id: String,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub action: Option<String>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub payload: PayloadSnapshot,
    #[serde(default)]
    pub processing_errors: Vec<ProcessingError>,
    #[serde(default)]
    pub related: Option<RelatedEntities>,
    pub created_at: DateTime<Utc>,
}

impl WebhookEventRecord {
    pub fn new(
        event_id: &str,
        event_type: Option<&str>,
        action: Option<&str>,
        raw: &Value,
    ) -> Self {
        Self {
            mp_event_id: event_id.to_string(),
            event_type: event_type.map(str::to_string),
            action: action.map(str::to_string),
            processed: false,
            processed_at: None,
            payload: PayloadSnapshot::from_raw(event_id, raw),
            processing_errors: Vec::new(),
            related: None,
            created_at: Utc::now(),
        }
    }
}

/// An inbound gateway notification, in either the current
/// (`{id, type, action, data: {id}}`) or the legacy (`{topic, resource}`) shape.
#[derive(Debug, Clone)]
pub struct WebhookNotification {
    raw: Value,
    delivery_id: Option<String>,
}

impl WebhookNotification {
    pub fn new(raw: Value) -> Self {
        Self {
            raw,
            delivery_id: None,
        }
    }

    /// Attach the gateway's own delivery id (`x-request-id`). Legacy payloads
    /// carry no event id, so it distinguishes successive notifications about
    /// the same resource. Without it they are keyed on topic and resource alone.
    pub fn with_delivery_id(mut self, delivery_id: Option<String>) -> Self {
        self.delivery_id = delivery_id.filter(|d| !d.is_empty());
        self
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn event_type(&self) -> Option<&str> {
        self.raw
            .get("type")
            .and_then(Value::as_str)
            .or_else(|| self.raw.get("topic").and_then(Value::as_str))
    }

    pub fn action(&self) -> Option<&str> {
        self.raw.get("action").and_then(Value::as_str)
    }

    pub fn is_legacy(&self) -> bool {
        self.raw.get("id").is_none() && self.raw.get("resource").is_some()
    }

    pub fn event_id(&self) -> Option<String> {
        if let Some(id) = self.raw.get("id").and_then(id_as_string) {
            return Some(id);
        }

        if self.is_legacy() {
            let topic = self.event_type()?;
            let resource = self.resource_id()?;
            return Some(match self.delivery_id.as_deref() {
                Some(delivery) => format!("{}:{}:{}", topic, resource, delivery),
                None => format!("{}:{}", topic, resource),
            });
        }

        None
    }

    fn resource_id(&self) -> Option<String> {
        self.raw
            .get("resource")
            .and_then(id_as_string)
            .map(|r| resource_id(&r))
    }

    pub fn is_payment(&self) -> bool {
        self.event_type() == Some("payment")
            || self
                .action()
                .map(|a| a.starts_with("payment."))
                .unwrap_or(false)
    }

    /// Gateway payment id the notification refers to.
    pub fn payment_id(&self) -> Option<String> {
        self.raw
            .get("data")
            .and_then(|d| d.get("id"))
            .and_then(id_as_string)
            .or_else(|| self.resource_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_shape() {
        let n = WebhookNotification::new(json!({
            "id": 12345,
            "type": "payment",
            "action": "payment.updated",
            "data": { "id": "987" },
            "live_mode": false
        }));

        assert_eq!(n.event_id().as_deref(), Some("12345"));
        assert!(n.is_payment());
        assert_eq!(n.payment_id().as_deref(), Some("987"));
    }

    #[test]
    fn test_action_prefix_marks_payment() {
        let n = WebhookNotification::new(json!({
            "id": "evt-1",
            "action": "payment.created",
            "data": { "id": 5 }
        }));
        assert!(n.is_payment());
        assert_eq!(n.payment_id().as_deref(), Some("5"));
    }

    #[test]
    fn test_legacy_shape_event_id() {
        let raw = json!({
            "topic": "payment",
            "resource": "https://api.mercadolibre.com/collections/notifications/555"
        });

        let without = WebhookNotification::new(raw.clone());
        assert_eq!(without.event_id().as_deref(), Some("payment:555"));
        assert_eq!(without.payment_id().as_deref(), Some("555"));

        let with = WebhookNotification::new(raw).with_delivery_id(Some("req-9".to_string()));
        assert_eq!(with.event_id().as_deref(), Some("payment:555:req-9"));
        assert!(with.is_payment());

        let no_topic = WebhookNotification::new(json!({ "resource": "555" }));
        assert!(no_topic.event_id().is_none());
    }

    #[test]
    fn test_snapshot_projection() {
        let raw = json!({
            "id": 1,
            "data": {
                "id": 42,
                "status": "approved",
                "transaction_amount": 150.5,
                "currency_id": "BRL"
            },
            "user_id": 777
        });

        let snapshot = PayloadSnapshot::from_raw("1", &raw);
        assert_eq!(snapshot.payment_id.as_deref(), Some("42"));
        assert_eq!(snapshot.status.as_deref(), Some("approved"));
        assert_eq!(snapshot.currency.as_deref(), Some("BRL"));
        assert_eq!(snapshot.amount, Decimal::try_from(150.5).ok());
    }
}
