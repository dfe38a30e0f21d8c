//! Persistence seams.
//!
//! Each store is a trait so the engine and orchestrator can run against
//! MongoDB in production and the in-memory implementations in tests.

use crate::models::{
    AssetType, BookingRecord, BookingStatus, Coupon, CouponAuditLog, CouponUsage, PaymentUpdate,
    RefundEntry, RelatedEntities, UsageStatus, WebhookEventRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key")]
    Duplicate,

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("failed to encode document: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("failed to decode document: {0}")]
    Decode(#[from] mongodb::bson::de::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => AppError::Conflict(anyhow::anyhow!("Resource already exists")),
            other => AppError::DatabaseError(anyhow::anyhow!(other)),
        }
    }
}

/// Result of trying to record a coupon usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Usage stored; `usage_count` is the coupon's counter after the increment.
    Recorded { usage_count: i64 },
    /// The booking already holds a non-cancelled usage.
    AlreadyApplied,
    /// The global usage limit was hit by a concurrent application.
    LimitReached,
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Insert a new coupon. A clashing code yields [`StoreError::Duplicate`].
    async fn insert_coupon(&self, coupon: &Coupon) -> Result<(), StoreError>;

    async fn find_coupon(&self, id: &str) -> Result<Option<Coupon>, StoreError>;

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, StoreError>;

    /// Persist every field except `usageCount`, which only moves through
    /// [`record_usage`](Self::record_usage) and [`transition_usage`](Self::transition_usage).
    async fn save_coupon_settings(&self, coupon: &Coupon) -> Result<(), StoreError>;

    /// Non-cancelled usages of one coupon by one user.
    async fn count_user_usages(&self, coupon_id: &str, user_id: &str) -> Result<u64, StoreError>;

    /// Non-cancelled usages of any coupon by one user.
    async fn count_user_usages_any(&self, user_id: &str) -> Result<u64, StoreError>;

    async fn find_active_usage_for_booking(
        &self,
        booking_id: &str,
        booking_type: AssetType,
    ) -> Result<Option<CouponUsage>, StoreError>;

    /// Store an `applied` usage and bump the coupon counter, never past
    /// `usage_limit`, never twice for the same booking.
    async fn record_usage(
        &self,
        usage: &CouponUsage,
        usage_limit: Option<i64>,
    ) -> Result<RecordOutcome, StoreError>;

    async fn find_usage(&self, id: &str) -> Result<Option<CouponUsage>, StoreError>;

    /// Move a usage from `from` to `to` and release its slot in the coupon
    /// counter (floored at 0). Returns `None` when the usage was not in `from`.
    async fn transition_usage(
        &self,
        usage_id: &str,
        from: UsageStatus,
        to: UsageStatus,
        reason: Option<String>,
    ) -> Result<Option<CouponUsage>, StoreError>;

    async fn list_usages(&self, coupon_id: &str) -> Result<Vec<CouponUsage>, StoreError>;

    async fn append_audit(&self, entry: &CouponAuditLog) -> Result<(), StoreError>;

    async fn list_audit(&self, coupon_id: &str) -> Result<Vec<CouponAuditLog>, StoreError>;

    /// Active, non-deleted coupons that asked for an expiry notice and have not had one.
    async fn find_expiry_candidates(&self) -> Result<Vec<Coupon>, StoreError>;

    /// Stamp `notificationSentAt` unless already set. Returns whether this call set it.
    async fn mark_expiry_notified(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    async fn get(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, StoreError>;

    /// Insert the event unless one with the same id exists.
    async fn record(
        &self,
        event_id: &str,
        event_type: Option<&str>,
        action: Option<&str>,
        raw: &Value,
    ) -> Result<(), StoreError>;

    async fn mark_processed(&self, event_id: &str) -> Result<(), StoreError>;

    /// Append a diagnostic error entry whose `retryCount` is the number of
    /// errors already recorded.
    async fn append_error(&self, event_id: &str, message: &str) -> Result<(), StoreError>;

    async fn attach_related(
        &self,
        event_id: &str,
        related: &RelatedEntities,
    ) -> Result<(), StoreError>;
}

/// Payment-related access to the per-asset-type booking collections.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find(
        &self,
        asset_type: AssetType,
        booking_id: &str,
    ) -> Result<Option<BookingRecord>, StoreError>;

    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<(BookingRecord, AssetType)>, StoreError>;

    /// Returns whether a booking was matched.
    async fn update_payment(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        update: &PaymentUpdate,
    ) -> Result<bool, StoreError>;

    async fn set_status(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        status: BookingStatus,
        payment_status: &crate::models::PaymentStatus,
    ) -> Result<bool, StoreError>;

    async fn push_refund(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        refund: &RefundEntry,
    ) -> Result<bool, StoreError>;

    /// Locate a booking without knowing its asset type.
    async fn find_any_type(
        &self,
        booking_id: &str,
    ) -> Result<Option<(BookingRecord, AssetType)>, StoreError> {
        for asset_type in AssetType::ALL {
            if let Some(booking) = self.find(asset_type, booking_id).await? {
                return Ok(Some((booking, asset_type)));
            }
        }
        Ok(None)
    }
}

/// Asset grants held by employees.
#[async_trait]
pub trait AssetPermissions: Send + Sync {
    /// Whether the employee holds a manage or edit grant on the asset.
    async fn can_manage(
        &self,
        employee_id: &str,
        asset_type: AssetType,
        asset_id: &str,
    ) -> Result<bool, StoreError>;
}
