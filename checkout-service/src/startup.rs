//! Application startup and lifecycle management.

use crate::config::CheckoutConfig;
use crate::handlers::{self, coupons, payments, webhooks};
use crate::services::{
    initialize_indexes, CouponEngine, EmailHook, GatewayClient, MongoAssetPermissions,
    MongoBookingRepository, MongoCouponStore, MongoWebhookEventStore, PaymentOrchestrator,
    PostCommitHook, VoucherHook, WebhookVerifier,
};
use crate::AppState;
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Routes plus the middleware stack, over an already assembled state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Coupon administration
        .route("/coupons", post(coupons::create_coupon))
        .route("/coupons/bulk", post(coupons::bulk_action))
        .route("/coupons/expire", post(coupons::expire_coupons))
        .route("/coupons/validate", post(coupons::validate_coupon))
        .route("/coupons/apply", post(coupons::apply_coupon))
        .route(
            "/coupons/:id",
            get(coupons::get_coupon)
                .put(coupons::update_coupon)
                .delete(coupons::delete_coupon),
        )
        .route("/coupons/:id/toggle", post(coupons::toggle_coupon))
        .route("/coupons/:id/users", post(coupons::assign_users))
        .route("/coupons/:id/duplicate", post(coupons::duplicate_coupon))
        .route("/coupons/:id/usages", get(coupons::list_usages))
        .route("/coupons/:id/audit", get(coupons::audit_log))
        .route("/coupon-usages/:id/refund", post(coupons::refund_usage))
        .route("/coupon-usages/:id/cancel", post(coupons::cancel_usage))
        // Payments
        .route("/payments", post(payments::create_payment))
        .route("/payments/preferences", post(payments::create_preference))
        .route("/payments/:id/capture", post(payments::capture_payment))
        .route("/payments/:id/cancel", post(payments::cancel_payment))
        .route("/payments/:id/refunds", post(payments::create_refund))
        .route(
            "/bookings/:asset_type/:id/approve",
            post(payments::approve_booking),
        )
        .route(
            "/bookings/:asset_type/:id/reject",
            post(payments::reject_booking),
        )
        // Gateway notifications, authenticated by signature rather than headers
        .route("/webhooks/mercadopago", post(webhooks::mercadopago))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        // Outermost, so the trace span sees a generated id too.
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Connect to MongoDB, wire the components and bind the listener.
    pub async fn build(config: CheckoutConfig) -> Result<Self, AppError> {
        let mut client_options = ClientOptions::parse(config.mongodb.uri.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some(config.service_name.clone());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.mongodb.database);

        initialize_indexes(&db).await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::from(e)
        })?;

        let gateway = GatewayClient::new(&config.gateway).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build gateway client: {}", e))
        })?;
        if gateway.is_configured() {
            tracing::info!("Mercado Pago client initialized");
        } else {
            tracing::warn!("MP_ACCESS_TOKEN not configured - gateway calls will fail");
        }

        let permissions = Arc::new(MongoAssetPermissions::new(&db));
        let coupons = CouponEngine::new(Arc::new(MongoCouponStore::new(&db)), permissions.clone());

        let hooks: Vec<Arc<dyn PostCommitHook>> = vec![
            Arc::new(VoucherHook::new(
                config.collaborators.voucher_service_url.clone(),
            )),
            Arc::new(EmailHook::new(
                config.collaborators.notification_service_url.clone(),
            )),
        ];

        let payments = PaymentOrchestrator::new(
            gateway,
            Arc::new(MongoBookingRepository::new(&db)),
            Arc::new(MongoWebhookEventStore::new(&db)),
            permissions,
            coupons.clone(),
            hooks,
            config.checkout.clone(),
        );

        let verifier = WebhookVerifier::new(
            config.gateway.webhook_secret.clone(),
            config.gateway.allow_unsigned_webhooks,
        );

        let state = AppState {
            config: config.clone(),
            coupons,
            payments: Arc::new(payments),
            verifier,
            db: Some(db),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Checkout service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router: build_router(state),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
