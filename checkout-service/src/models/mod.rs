pub mod actor;
pub mod booking;
pub mod coupon;
pub mod webhook;

pub use actor::{Actor, Role};
pub use booking::{
    AssetType, BookingRecord, BookingStatus, PaymentStatus, PaymentUpdate, RefundEntry,
};
pub use coupon::{
    ApplicableAsset, AuditAction, Coupon, CouponAudience, CouponAuditLog, CouponDraft,
    CouponPatch, CouponUsage, DiscountType, FieldChange, GlobalApplication, UsageStatus,
};
pub use webhook::{
    PayloadSnapshot, ProcessingError, RelatedEntities, WebhookEventRecord, WebhookNotification,
};
