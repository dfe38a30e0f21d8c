//! Best-effort side effects run after a booking transition is committed.
//!
//! A hook failing is logged and never undoes the transition that triggered it.

use crate::models::{AssetType, BookingRecord};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventKind {
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEvent {
    pub kind: BookingEventKind,
    pub booking: BookingRecord,
    pub asset_type: AssetType,
    pub reason: Option<String>,
}

#[async_trait]
pub trait PostCommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, event: &BookingEvent) -> anyhow::Result<()>;
}

/// Run every hook, isolating failures.
pub async fn run_hooks(hooks: &[Arc<dyn PostCommitHook>], event: &BookingEvent) {
    for hook in hooks {
        if let Err(e) = hook.run(event).await {
            tracing::warn!(
                hook = hook.name(),
                booking_id = %event.booking.id,
                asset_type = %event.asset_type,
                error = %e,
                "Post-commit hook failed"
            );
        }
    }
}

fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// Asks the voucher service to issue a voucher for a confirmed booking.
pub struct VoucherHook {
    client: Client,
    base_url: Option<String>,
}

impl VoucherHook {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl PostCommitHook for VoucherHook {
    fn name(&self) -> &'static str {
        "voucher"
    }

    async fn run(&self, event: &BookingEvent) -> anyhow::Result<()> {
        if event.kind != BookingEventKind::Confirmed {
            return Ok(());
        }
        let Some(base_url) = &self.base_url else {
            tracing::debug!("Voucher service not configured, skipping voucher");
            return Ok(());
        };

        self.client
            .post(format!("{}/vouchers", base_url))
            .json(&json!({
                "bookingId": event.booking.id,
                "assetType": event.asset_type,
                "assetId": event.booking.asset_id,
                "userId": event.booking.user_id,
            }))
            .send()
            .await?
            .error_for_status()?;

        tracing::info!(booking_id = %event.booking.id, "Voucher requested");
        Ok(())
    }
}

/// Sends the confirmation or cancellation email through the notification service.
pub struct EmailHook {
    client: Client,
    base_url: Option<String>,
}

impl EmailHook {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl PostCommitHook for EmailHook {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn run(&self, event: &BookingEvent) -> anyhow::Result<()> {
        let Some(base_url) = &self.base_url else {
            tracing::debug!("Notification service not configured, skipping email");
            return Ok(());
        };
        let Some(to) = &event.booking.user_email else {
            tracing::debug!(booking_id = %event.booking.id, "Booking has no email, skipping");
            return Ok(());
        };

        let (subject, body) = match event.kind {
            BookingEventKind::Confirmed => (
                "Your booking is confirmed".to_string(),
                format!("Booking {} is confirmed.", event.booking.id),
            ),
            BookingEventKind::Rejected => (
                "Your booking was cancelled".to_string(),
                match &event.reason {
                    Some(reason) => {
                        format!("Booking {} was cancelled: {}", event.booking.id, reason)
                    }
                    None => format!("Booking {} was cancelled.", event.booking.id),
                },
            ),
        };

        self.client
            .post(format!("{}/notifications/email", base_url))
            .json(&json!({
                "to": to,
                "subject": subject,
                "body_text": body,
                "metadata": {
                    "booking_id": event.booking.id,
                    "asset_type": event.asset_type.as_str(),
                    "event": event.kind,
                },
            }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
