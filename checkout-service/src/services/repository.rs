use crate::models::{
    AssetType, BookingRecord, BookingStatus, Coupon, CouponAuditLog, CouponUsage, PaymentStatus,
    PaymentUpdate, RefundEntry, RelatedEntities, UsageStatus, WebhookEventRecord,
};
use crate::services::store::{
    AssetPermissions, BookingRepository, CouponStore, RecordOutcome, StoreError,
    WebhookEventStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, to_document, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument, UpdateOptions,
};
use mongodb::{Collection, Database, IndexModel};
use serde_json::Value;
use std::collections::HashMap;

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn now_bson() -> Result<mongodb::bson::Bson, StoreError> {
    Ok(to_bson(&Utc::now())?)
}

/// Create the indexes the stores rely on for uniqueness and lookups.
///
/// The partial unique index on usages closes the race between two concurrent
/// applications to the same booking. It needs MongoDB 6.0+ for `$in`.
pub async fn initialize_indexes(db: &Database) -> Result<(), StoreError> {
    let coupon_code = IndexModel::builder()
        .keys(doc! { "code": 1 })
        .options(
            IndexOptions::builder()
                .name("coupon_code_unique".to_string())
                .unique(true)
                .build(),
        )
        .build();
    db.collection::<Document>("coupons")
        .create_indexes([coupon_code], None)
        .await?;

    let booking_slot = IndexModel::builder()
        .keys(doc! { "bookingId": 1, "bookingType": 1 })
        .options(
            IndexOptions::builder()
                .name("usage_booking_slot_unique".to_string())
                .unique(true)
                .partial_filter_expression(doc! {
                    "status": { "$in": ["applied", "refunded"] }
                })
                .build(),
        )
        .build();
    let usage_by_user = IndexModel::builder()
        .keys(doc! { "couponId": 1, "userId": 1 })
        .options(
            IndexOptions::builder()
                .name("usage_coupon_user_idx".to_string())
                .build(),
        )
        .build();
    db.collection::<Document>("coupon_usages")
        .create_indexes([booking_slot, usage_by_user], None)
        .await?;

    let audit_by_coupon = IndexModel::builder()
        .keys(doc! { "couponId": 1, "performedAt": 1 })
        .options(
            IndexOptions::builder()
                .name("audit_coupon_time_idx".to_string())
                .build(),
        )
        .build();
    db.collection::<Document>("coupon_audit_logs")
        .create_indexes([audit_by_coupon], None)
        .await?;

    let event_id = IndexModel::builder()
        .keys(doc! { "mpEventId": 1 })
        .options(
            IndexOptions::builder()
                .name("webhook_event_id_unique".to_string())
                .unique(true)
                .build(),
        )
        .build();
    db.collection::<Document>("webhook_events")
        .create_indexes([event_id], None)
        .await?;

    let grants = IndexModel::builder()
        .keys(doc! { "employeeId": 1, "assetType": 1, "assetId": 1 })
        .options(
            IndexOptions::builder()
                .name("employee_asset_idx".to_string())
                .build(),
        )
        .build();
    db.collection::<Document>("employee_asset_permissions")
        .create_indexes([grants], None)
        .await?;

    tracing::info!("Checkout service indexes initialized");
    Ok(())
}

#[derive(Clone)]
pub struct MongoCouponStore {
    coupons: Collection<Coupon>,
    usages: Collection<CouponUsage>,
    audit: Collection<CouponAuditLog>,
}

impl MongoCouponStore {
    pub fn new(db: &Database) -> Self {
        Self {
            coupons: db.collection("coupons"),
            usages: db.collection("coupon_usages"),
            audit: db.collection("coupon_audit_logs"),
        }
    }

    /// Give back one slot of the usage counter, never going below zero.
    async fn release_slot(&self, coupon_id: &str) -> Result<(), StoreError> {
        self.coupons
            .update_one(
                doc! { "_id": coupon_id, "usageCount": { "$gt": 0 } },
                doc! { "$inc": { "usageCount": -1 } },
                None,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CouponStore for MongoCouponStore {
    async fn insert_coupon(&self, coupon: &Coupon) -> Result<(), StoreError> {
        match self.coupons.insert_one(coupon, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_coupon(&self, id: &str) -> Result<Option<Coupon>, StoreError> {
        Ok(self.coupons.find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        Ok(self.coupons.find_one(doc! { "code": code }, None).await?)
    }

    async fn save_coupon_settings(&self, coupon: &Coupon) -> Result<(), StoreError> {
        let mut fields = to_document(coupon)?;
        fields.remove("_id");
        fields.remove("usageCount");

        self.coupons
            .update_one(doc! { "_id": &coupon.id }, doc! { "$set": fields }, None)
            .await?;
        Ok(())
    }

    async fn count_user_usages(&self, coupon_id: &str, user_id: &str) -> Result<u64, StoreError> {
        let filter = doc! {
            "couponId": coupon_id,
            "userId": user_id,
            "status": { "$ne": "cancelled" }
        };
        Ok(self.usages.count_documents(filter, None).await?)
    }

    async fn count_user_usages_any(&self, user_id: &str) -> Result<u64, StoreError> {
        let filter = doc! { "userId": user_id, "status": { "$ne": "cancelled" } };
        Ok(self.usages.count_documents(filter, None).await?)
    }

    async fn find_active_usage_for_booking(
        &self,
        booking_id: &str,
        booking_type: AssetType,
    ) -> Result<Option<CouponUsage>, StoreError> {
        let filter = doc! {
            "bookingId": booking_id,
            "bookingType": booking_type.as_str(),
            "status": { "$ne": "cancelled" }
        };
        Ok(self.usages.find_one(filter, None).await?)
    }

    async fn record_usage(
        &self,
        usage: &CouponUsage,
        usage_limit: Option<i64>,
    ) -> Result<RecordOutcome, StoreError> {
        // Claim a slot first so the counter can never pass the limit, then
        // insert. The unique booking index decides concurrent applications.
        let mut filter = doc! { "_id": &usage.coupon_id, "deletedAt": null };
        if let Some(limit) = usage_limit {
            filter.insert("usageCount", doc! { "$lt": limit });
        }

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let Some(claimed) = self
            .coupons
            .find_one_and_update(filter, doc! { "$inc": { "usageCount": 1 } }, options)
            .await?
        else {
            return Ok(RecordOutcome::LimitReached);
        };

        match self.usages.insert_one(usage, None).await {
            Ok(_) => Ok(RecordOutcome::Recorded {
                usage_count: claimed.usage_count,
            }),
            Err(e) if is_duplicate_key(&e) => {
                self.release_slot(&usage.coupon_id).await?;
                Ok(RecordOutcome::AlreadyApplied)
            }
            Err(e) => {
                self.release_slot(&usage.coupon_id).await?;
                Err(e.into())
            }
        }
    }

    async fn find_usage(&self, id: &str) -> Result<Option<CouponUsage>, StoreError> {
        Ok(self.usages.find_one(doc! { "_id": id }, None).await?)
    }

    async fn transition_usage(
        &self,
        usage_id: &str,
        from: UsageStatus,
        to: UsageStatus,
        reason: Option<String>,
    ) -> Result<Option<CouponUsage>, StoreError> {
        let mut set = doc! { "status": to_bson(&to)? };
        match to {
            UsageStatus::Refunded => {
                set.insert("refundedAt", now_bson()?);
                set.insert("refundReason", reason);
            }
            UsageStatus::Cancelled => {
                set.insert("cancelledAt", now_bson()?);
            }
            UsageStatus::Applied => {}
        }

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .usages
            .find_one_and_update(
                doc! { "_id": usage_id, "status": to_bson(&from)? },
                doc! { "$set": set },
                options,
            )
            .await?;

        if let Some(usage) = &updated {
            self.release_slot(&usage.coupon_id).await?;
        }
        Ok(updated)
    }

    async fn list_usages(&self, coupon_id: &str) -> Result<Vec<CouponUsage>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
        let cursor = self
            .usages
            .find(doc! { "couponId": coupon_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn append_audit(&self, entry: &CouponAuditLog) -> Result<(), StoreError> {
        self.audit.insert_one(entry, None).await?;
        Ok(())
    }

    async fn list_audit(&self, coupon_id: &str) -> Result<Vec<CouponAuditLog>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "performedAt": 1 })
            .build();
        let cursor = self
            .audit
            .find(doc! { "couponId": coupon_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_expiry_candidates(&self) -> Result<Vec<Coupon>, StoreError> {
        let filter = doc! {
            "isActive": true,
            "deletedAt": null,
            "notifyOnExpiration": true,
            "notificationSentAt": null
        };
        let cursor = self.coupons.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn mark_expiry_notified(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = self
            .coupons
            .update_one(
                doc! { "_id": id, "notificationSentAt": null },
                doc! {
                    "$set": { "notificationSentAt": to_bson(&at)?, "updatedAt": to_bson(&at)? }
                },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }
}

#[derive(Clone)]
pub struct MongoWebhookEventStore {
    events: Collection<WebhookEventRecord>,
}

impl MongoWebhookEventStore {
    pub fn new(db: &Database) -> Self {
        Self {
            events: db.collection("webhook_events"),
        }
    }
}

#[async_trait]
impl WebhookEventStore for MongoWebhookEventStore {
    async fn get(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, StoreError> {
        Ok(self
            .events
            .find_one(doc! { "mpEventId": event_id }, None)
            .await?)
    }

    async fn record(
        &self,
        event_id: &str,
        event_type: Option<&str>,
        action: Option<&str>,
        raw: &Value,
    ) -> Result<(), StoreError> {
        let record = WebhookEventRecord::new(event_id, event_type, action, raw);
        let options = UpdateOptions::builder().upsert(true).build();

        match self
            .events
            .update_one(
                doc! { "mpEventId": event_id },
                doc! { "$setOnInsert": to_document(&record)? },
                options,
            )
            .await
        {
            Ok(_) => Ok(()),
            // Lost an upsert race against a concurrent delivery of the same event.
            Err(e) if is_duplicate_key(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), StoreError> {
        self.events
            .update_one(
                doc! { "mpEventId": event_id },
                doc! { "$set": { "processed": true, "processedAt": now_bson()? } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn append_error(&self, event_id: &str, message: &str) -> Result<(), StoreError> {
        // Pipeline update so retryCount is taken from the stored list atomically.
        let entry = doc! {
            "error": { "$literal": message },
            "timestamp": now_bson()?,
            "retryCount": { "$size": { "$ifNull": ["$processingErrors", []] } }
        };
        let pipeline = vec![doc! {
            "$set": {
                "processingErrors": {
                    "$concatArrays": [
                        { "$ifNull": ["$processingErrors", []] },
                        [entry]
                    ]
                }
            }
        }];

        self.events
            .update_one(doc! { "mpEventId": event_id }, pipeline, None)
            .await?;
        Ok(())
    }

    async fn attach_related(
        &self,
        event_id: &str,
        related: &RelatedEntities,
    ) -> Result<(), StoreError> {
        self.events
            .update_one(
                doc! { "mpEventId": event_id },
                doc! { "$set": { "related": to_bson(related)? } },
                None,
            )
            .await?;
        Ok(())
    }
}

/// Booking access dispatched on asset type, one collection per type.
#[derive(Clone)]
pub struct MongoBookingRepository {
    collections: HashMap<AssetType, Collection<BookingRecord>>,
}

impl MongoBookingRepository {
    pub fn new(db: &Database) -> Self {
        let collections = AssetType::ALL
            .into_iter()
            .map(|t| (t, db.collection(t.booking_collection())))
            .collect();
        Self { collections }
    }

    fn collection(&self, asset_type: AssetType) -> &Collection<BookingRecord> {
        // Populated for every variant in `new`.
        &self.collections[&asset_type]
    }

    async fn patch(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        update: Document,
    ) -> Result<bool, StoreError> {
        let result = self
            .collection(asset_type)
            .update_one(doc! { "_id": booking_id }, update, None)
            .await?;
        Ok(result.matched_count == 1)
    }
}

#[async_trait]
impl BookingRepository for MongoBookingRepository {
    async fn find(
        &self,
        asset_type: AssetType,
        booking_id: &str,
    ) -> Result<Option<BookingRecord>, StoreError> {
        Ok(self
            .collection(asset_type)
            .find_one(doc! { "_id": booking_id }, None)
            .await?)
    }

    async fn find_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<(BookingRecord, AssetType)>, StoreError> {
        for asset_type in AssetType::ALL {
            if let Some(booking) = self
                .collection(asset_type)
                .find_one(doc! { "mpPaymentId": payment_id }, None)
                .await?
            {
                return Ok(Some((booking, asset_type)));
            }
        }
        Ok(None)
    }

    async fn update_payment(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        update: &PaymentUpdate,
    ) -> Result<bool, StoreError> {
        let mut set = doc! { "updatedAt": now_bson()? };
        if let Some(status) = &update.payment_status {
            set.insert("paymentStatus", status.as_str());
        }
        if let Some(id) = &update.mp_payment_id {
            set.insert("mpPaymentId", id);
        }
        if let Some(id) = &update.mp_preference_id {
            set.insert("mpPreferenceId", id);
        }
        if let Some(url) = &update.receipt_url {
            set.insert("receiptUrl", url);
        }

        self.patch(asset_type, booking_id, doc! { "$set": set }).await
    }

    async fn set_status(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        status: BookingStatus,
        payment_status: &PaymentStatus,
    ) -> Result<bool, StoreError> {
        let update = doc! {
            "$set": {
                "status": to_bson(&status)?,
                "paymentStatus": payment_status.as_str(),
                "updatedAt": now_bson()?
            }
        };
        self.patch(asset_type, booking_id, update).await
    }

    async fn push_refund(
        &self,
        asset_type: AssetType,
        booking_id: &str,
        refund: &RefundEntry,
    ) -> Result<bool, StoreError> {
        let update = doc! {
            "$push": { "refunds": to_bson(refund)? },
            "$set": { "updatedAt": now_bson()? }
        };
        self.patch(asset_type, booking_id, update).await
    }
}

/// Grants stored as `{employeeId, assetType, assetId, permissions: [..]}`.
#[derive(Clone)]
pub struct MongoAssetPermissions {
    grants: Collection<Document>,
}

impl MongoAssetPermissions {
    pub fn new(db: &Database) -> Self {
        Self {
            grants: db.collection("employee_asset_permissions"),
        }
    }
}

#[async_trait]
impl AssetPermissions for MongoAssetPermissions {
    async fn can_manage(
        &self,
        employee_id: &str,
        asset_type: AssetType,
        asset_id: &str,
    ) -> Result<bool, StoreError> {
        let filter = doc! {
            "employeeId": employee_id,
            "assetType": asset_type.as_str(),
            "assetId": asset_id,
            "permissions": { "$in": ["manage", "edit"] }
        };
        Ok(self.grants.count_documents(filter, None).await? > 0)
    }
}
