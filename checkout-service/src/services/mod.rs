pub mod coupons;
pub mod gateway;
pub mod hooks;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod repository;
pub mod store;
pub mod webhook_verifier;

pub use coupons::{CouponEngine, CouponError};
pub use gateway::{GatewayClient, GatewayError};
pub use hooks::{EmailHook, PostCommitHook, VoucherHook};
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{PaymentError, PaymentOrchestrator, WebhookOutcome};
pub use repository::{
    initialize_indexes, MongoAssetPermissions, MongoBookingRepository, MongoCouponStore,
    MongoWebhookEventStore,
};
pub use store::{AssetPermissions, BookingRepository, CouponStore, StoreError, WebhookEventStore};
pub use webhook_verifier::{SignedRequest, WebhookVerifier};
