pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use config::CheckoutConfig;
use services::{CouponEngine, PaymentOrchestrator, WebhookVerifier};
use std::sync::Arc;

pub use startup::{build_router, Application};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: CheckoutConfig,
    pub coupons: CouponEngine,
    pub payments: Arc<PaymentOrchestrator>,
    pub verifier: WebhookVerifier,
    /// Present when the stores are Mongo-backed; used by the readiness probe.
    pub db: Option<mongodb::Database>,
}
