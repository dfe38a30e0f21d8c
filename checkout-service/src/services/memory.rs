//! In-process store implementations for tests and local runs without MongoDB.

use crate::models::{
    AssetType, BookingRecord, BookingStatus, Coupon, CouponAuditLog, CouponUsage, PaymentStatus,
    PaymentUpdate, ProcessingError, RefundEntry, RelatedEntities, UsageStatus, WebhookEventRecord,
};
use crate::services::store::{
    AssetPermissions, BookingRepository, CouponStore, RecordOutcome, StoreError,
    WebhookEventStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct CouponState {
    coupons: HashMap<String, Coupon>,
    usages: Vec<CouponUsage>,
    audit: Vec<CouponAuditLog>,
}

impl CouponState {
    fn release_slot(&mut self, coupon_id: &str) {
        if let Some(coupon) = self.coupons.get_mut(coupon_id) {
            coupon.usage_count = (coupon.usage_count - 1).max(0);
        }
    }
}

/// Single lock over coupons, usages and audit entries, so multi-record
/// operations are atomic.
#[derive(Default)]
pub struct InMemoryCouponStore {
    state: Mutex<CouponState>,
}

impl InMemoryCouponStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CouponStore for InMemoryCouponStore {
    async fn insert_coupon(&self, coupon: &Coupon) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.coupons.values().any(|c| c.code == coupon.code)
            || state.coupons.contains_key(&coupon.id)
        {
            return Err(StoreError::Duplicate);
        }
        state.coupons.insert(coupon.id.clone(), coupon.clone());
        Ok(())
    }

    async fn find_coupon(&self, id: &str) -> Result<Option<Coupon>, StoreError> {
        Ok(self.state.lock().await.coupons.get(id).cloned())
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .coupons
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn save_coupon_settings(&self, coupon: &Coupon) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state.coupons.get_mut(&coupon.id) {
            let usage_count = stored.usage_count;
            *stored = coupon.clone();
            stored.usage_count = usage_count;
        }
        Ok(())
    }

    async fn count_user_usages(&self, coupon_id: &str, user_id: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .usages
            .iter()
            .filter(|u| {
                u.coupon_id == coupon_id
                    && u.user_id == user_id
                    && u.status != UsageStatus::Cancelled
            })
            .count() as u64)
    }

    async fn count_user_usages_any(&self, user_id: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .usages
            .iter()
            .filter(|u| u.user_id == user_id && u.status != UsageStatus::Cancelled)
            .count() as u64)
    }

    async fn find_active_usage_for_booking(
        &self,
        booking_id: &str,
        booking_type: AssetType,
    ) -> Result<Option<CouponUsage>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .usages
            .iter()
            .find(|u| {
                u.booking_id == booking_id
                    && u.booking_type == booking_type
                    && u.status != UsageStatus::Cancelled
            })
            .cloned())
    }

    async fn record_usage(
        &self,
        usage: &CouponUsage,
        usage_limit: Option<i64>,
    ) -> Result<RecordOutcome, StoreError> {
        let mut state = self.state.lock().await;

        let booking_taken = state.usages.iter().any(|u| {
            u.booking_id == usage.booking_id
                && u.booking_type == usage.booking_type
                && u.status != UsageStatus::Cancelled
        });
        if booking_taken {
            return Ok(RecordOutcome::AlreadyApplied);
        }

        let Some(coupon) = state
            .coupons
            .get_mut(&usage.coupon_id)
            .filter(|c| !c.is_deleted())
        else {
            return Ok(RecordOutcome::LimitReached);
        };
        if usage_limit.is_some_and(|limit| coupon.usage_count >= limit) {
            return Ok(RecordOutcome::LimitReached);
        }

        coupon.usage_count += 1;
        let usage_count = coupon.usage_count;
        state.usages.push(usage.clone());

        Ok(RecordOutcome::Recorded { usage_count })
    }

    async fn find_usage(&self, id: &str) -> Result<Option<CouponUsage>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.usages.iter().find(|u| u.id == id).cloned())
    }

    async fn transition_usage(
        &self,
        usage_id: &str,
        from: UsageStatus,
        to: UsageStatus,
        reason: Option<String>,
    ) -> Result<Option<CouponUsage>, StoreError> {
        let mut state = self.state.lock().await;

        let Some(usage) = state
            .usages
            .iter_mut()
            .find(|u| u.id == usage_id && u.status == from)
        else {
            return Ok(None);
        };

        let now = Utc::now();
        usage.status = to;
        match to {
            UsageStatus::Refunded => {
                usage.refunded_at = Some(now);
                usage.refund_reason = reason;
            }
            UsageStatus::Cancelled => usage.cancelled_at = Some(now),
            UsageStatus::Applied => {}
        }
        let updated = usage.clone();

        state.release_slot(&updated.coupon_id);
        Ok(Some(updated))
    }

    async fn list_usages(&self, coupon_id: &str) -> Result<Vec<CouponUsage>, StoreError> {
        let state = self.state.lock().await;
        let mut usages: Vec<_> = state
            .usages
            .iter()
            .filter(|u| u.coupon_id == coupon_id)
            .cloned()
            .collect();
        usages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(usages)
    }

    async fn append_audit(&self, entry: &CouponAuditLog) -> Result<(), StoreError> {
        self.state.lock().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, coupon_id: &str) -> Result<Vec<CouponAuditLog>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|a| a.coupon_id == coupon_id)
            .cloned()
            .collect())
    }

    async fn find_expiry_candidates(&self) -> Result<Vec<Coupon>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .coupons
            .values()
            .filter(|c| {
                c.is_active
                    && !c.is_deleted()
                    && c.notify_on_expiration
                    && c.notification_sent_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn mark_expiry_notified(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.coupons.get_mut(id) {
            Some(coupon) if coupon.notification_sent_at.is_none() => {
                coupon.notification_sent_at = Some(at);
                coupon.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryWebhookEventStore {
    events: Mutex<HashMap<String, WebhookEventRecord>>,
}

impl InMemoryWebhookEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryWebhookEventStore {
    async fn get(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, StoreError> {
        Ok(self.events.lock().await.get(event_id).cloned())
    }

    async fn record(
        &self,
        event_id: &str,
        event_type: Option<&str>,
        action: Option<&str>,
        raw: &Value,
    ) -> Result<(), StoreError> {
        self.events
            .lock()
            .await
            .entry(event_id.to_string())
            .or_insert_with(|| WebhookEventRecord::new(event_id, event_type, action, raw));
        Ok(())
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), StoreError> {
        if let Some(event) = self.events.lock().await.get_mut(event_id) {
            event.processed = true;
            event.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn append_error(&self, event_id: &str, message: &str) -> Result<(), StoreError> {
        if let Some(event) = self.events.lock().await.get_mut(event_id) {
            let retry_count = event.processing_errors.len() as u32;
            event.processing_errors.push(ProcessingError {
                error: message.to_string(),
                timestamp: Utc::now(),
                retry_count,
            });
        }
        Ok(())
    }

    async fn attach_related(
        &self,
        event_id: &str,
        related: &RelatedEntities,
    ) -> Result<(), StoreError> {
        if let Some(event) = self.events.lock().await.get_mut(event_id) {
            event.related = Some(related.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: Mutex<HashMap<(AssetType, String), BookingRecord>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a booking.
    pub async fn insert(&self, asset_type: AssetType, booking: BookingRecord) {
        self.bookings
            .lock()
            .await
            .insert((asset_type, booking.id.clone()), booking);
    }

    async fn modify<F>(&self, asset_type: AssetType, booking_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut BookingRecord) + Send,
    {
        let mut bookings = self.bookings.lock().await;
        match bookings.get_mut(&(asset_type, booking_id.to_string())) {
            Some(booking) => {
                f(booking);
                booking.updated_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn find(
        &self,
        asset_type: AssetType,
        booking_id: &str,
    ) -> Result<Option<BookingRecord>, StoreError> {
        Ok(self
            .bookings
            .lock()
            .await
            .get(&(asset_type, booking_id.to_string()))
            .cloned())
    }

    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<(BookingRecord, AssetType)>, StoreError> {
        let bookings = self.bookings.lock().await;
        Ok(bookings
            .iter()
            .find(|(_, b)| b.mp_payment_id.as_deref() == Some(payment_id))
            .map(|((asset_type, _), b)| (b.clone(), *asset_type)))
    }

    async fn update_payment(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        update: &PaymentUpdate,
    ) -> Result<bool, StoreError> {
        let update = update.clone();
        Ok(self
            .modify(asset_type, booking_id, move |b| {
                if let Some(status) = update.payment_status {
                    b.payment_status = status;
                }
                if let Some(id) = update.mp_payment_id {
                    b.mp_payment_id = Some(id);
                }
                if let Some(id) = update.mp_preference_id {
                    b.mp_preference_id = Some(id);
                }
                if let Some(url) = update.receipt_url {
                    b.receipt_url = Some(url);
                }
            })
            .await)
    }

    async fn set_status(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        status: BookingStatus,
        payment_status: &PaymentStatus,
    ) -> Result<bool, StoreError> {
        let payment_status = payment_status.clone();
        Ok(self
            .modify(asset_type, booking_id, move |b| {
                b.status = status;
                b.payment_status = payment_status;
            })
            .await)
    }

    async fn push_refund(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        refund: &RefundEntry,
    ) -> Result<bool, StoreError> {
        let refund = refund.clone();
        Ok(self
            .modify(asset_type, booking_id, move |b| b.refunds.push(refund))
            .await)
    }
}

#[derive(Default)]
pub struct InMemoryAssetPermissions {
    grants: Mutex<HashSet<(String, AssetType, String)>>,
}

impl InMemoryAssetPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, employee_id: &str, asset_type: AssetType, asset_id: &str) {
        self.grants.lock().await.insert((
            employee_id.to_string(),
            asset_type,
            asset_id.to_string(),
        ));
    }
}

#[async_trait]
impl AssetPermissions for InMemoryAssetPermissions {
    async fn can_manage(
        &self,
        employee_id: &str,
        asset_type: AssetType,
        asset_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.grants.lock().await.contains(&(
            employee_id.to_string(),
            asset_type,
            asset_id.to_string(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_webhook_record_is_idempotent() {
        let store = InMemoryWebhookEventStore::new();
        let raw = json!({ "id": 1, "type": "payment", "data": { "id": "9" } });

        store.record("1", Some("payment"), None, &raw).await.unwrap();
        store.mark_processed("1").await.unwrap();
        store.record("1", Some("payment"), None, &raw).await.unwrap();

        let event = store.get("1").await.unwrap().unwrap();
        assert!(event.processed);
        assert_eq!(event.payload.payment_id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_append_error_counts_previous_errors() {
        let store = InMemoryWebhookEventStore::new();
        store.record("e", None, None, &json!({})).await.unwrap();

        store.append_error("e", "first").await.unwrap();
        store.append_error("e", "second").await.unwrap();

        let event = store.get("e").await.unwrap().unwrap();
        let counts: Vec<u32> = event.processing_errors.iter().map(|e| e.retry_count).collect();
        assert_eq!(counts, vec![0, 1]);
        assert!(!event.processed);
    }

    #[tokio::test]
    async fn test_find_any_type_scans_every_collection() {
        let repo = InMemoryBookingRepository::new();
        repo.insert(AssetType::Vehicle, BookingRecord::new("bk-7")).await;

        let (booking, asset_type) = repo.find_any_type("bk-7").await.unwrap().unwrap();
        assert_eq!(booking.id, "bk-7");
        assert_eq!(asset_type, AssetType::Vehicle);
        assert!(repo.find_any_type("missing").await.unwrap().is_none());
    }
}
