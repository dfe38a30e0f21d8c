//! Payment lifecycle against the gateway, and reconciliation of booking and
//! coupon state from gateway notifications.

use crate::config::CheckoutUrls;
use crate::models::{
    Actor, AssetType, BookingRecord, BookingStatus, PaymentStatus, PaymentUpdate, RefundEntry,
    RelatedEntities, Role, WebhookNotification,
};
use crate::services::coupons::{CouponEngine, CouponError};
use crate::services::gateway::{
    BackUrls, GatewayClient, GatewayError, PayerInfo, PaymentMetadata, PaymentRequest,
    PreferenceItem, PreferenceRequest,
};
use crate::services::hooks::{run_hooks, BookingEvent, BookingEventKind, PostCommitHook};
use crate::services::metrics;
use crate::services::store::{AssetPermissions, BookingRepository, StoreError, WebhookEventStore};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Booking {0} not found")]
    BookingNotFound(String),

    #[error("Booking has no gateway payment to capture")]
    NoPaymentToCapture,

    #[error("Payment capture was not confirmed by the gateway (status {0})")]
    CaptureNotConfirmed(String),

    #[error("Booking with payment status {0} cannot be approved")]
    NotApprovable(PaymentStatus),

    #[error("Notification carries no event id")]
    MissingEventId,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::BookingNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            PaymentError::NoPaymentToCapture | PaymentError::Invalid(_) => {
                AppError::Unprocessable(anyhow::anyhow!(err.to_string()))
            }
            PaymentError::NotApprovable(_) => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            PaymentError::MissingEventId => AppError::BadRequest(anyhow::anyhow!(err.to_string())),
            PaymentError::Forbidden(_) => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            PaymentError::CaptureNotConfirmed(_) => AppError::BadGateway(err.to_string()),
            PaymentError::Gateway(GatewayError::MissingCredential) => {
                AppError::ConfigError(anyhow::anyhow!(
                    "Payment gateway credentials are not configured"
                ))
            }
            PaymentError::Gateway(GatewayError::Timeout) => {
                AppError::GatewayTimeout("payment provider did not respond in time".to_string())
            }
            PaymentError::Gateway(GatewayError::Api { status, message }) => {
                tracing::warn!(status, message = %message, "Gateway rejected request");
                AppError::BadGateway(format!("payment provider rejected the request ({})", status))
            }
            PaymentError::Gateway(e) => {
                tracing::error!(error = %e, "Gateway call failed");
                AppError::BadGateway("payment provider unavailable".to_string())
            }
            PaymentError::Coupon(e) => e.into(),
            PaymentError::Store(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceInput {
    pub booking_id: String,
    pub asset_type: AssetType,
    pub title: String,
    /// Amount to charge, after any coupon discount.
    pub amount: Decimal,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub payer_email: Option<String>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPreference {
    pub preference_id: String,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInput {
    pub booking_id: String,
    pub asset_type: AssetType,
    pub amount: Decimal,
    pub token: String,
    pub payment_method_id: String,
    #[serde(default)]
    pub installments: Option<u32>,
    #[serde(default)]
    pub payer_email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub payment_id: String,
    pub payment_status: PaymentStatus,
    pub gateway_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed {
        #[serde(rename = "bookingId")]
        booking_id: String,
        #[serde(rename = "paymentStatus")]
        payment_status: PaymentStatus,
    },
    AlreadyProcessed,
    Ignored,
}

/// Proof that the money for a booking has been captured. Only
/// [`PaymentOrchestrator::ensure_captured`] produces one, so a booking cannot
/// be confirmed without going through it.
struct CaptureReceipt {
    payment_status: PaymentStatus,
}

/// Short hex digest used to tell idempotency keys apart.
fn fingerprint(input: &str) -> String {
    hex::encode(&Sha256::digest(input.as_bytes())[..8])
}

/// Changes whenever what the buyer would be charged changes, so a repriced
/// checkout for the same booking is not answered from the gateway's cache.
fn preference_fingerprint(request: &PreferenceRequest) -> String {
    let items = request
        .items
        .iter()
        .map(|item| {
            format!(
                "{}|{}|{}|{}",
                item.title,
                item.quantity,
                item.unit_price.normalize(),
                item.currency_id
            )
        })
        .collect::<Vec<_>>()
        .join(";");
    let coupon = request.metadata.coupon_code.as_deref().unwrap_or("");
    fingerprint(&format!("{}#{}", items, coupon))
}

pub struct PaymentOrchestrator {
    gateway: GatewayClient,
    bookings: Arc<dyn BookingRepository>,
    events: Arc<dyn WebhookEventStore>,
    permissions: Arc<dyn AssetPermissions>,
    coupons: CouponEngine,
    hooks: Vec<Arc<dyn PostCommitHook>>,
    checkout: CheckoutUrls,
}

impl PaymentOrchestrator {
    pub fn new(
        gateway: GatewayClient,
        bookings: Arc<dyn BookingRepository>,
        events: Arc<dyn WebhookEventStore>,
        permissions: Arc<dyn AssetPermissions>,
        coupons: CouponEngine,
        hooks: Vec<Arc<dyn PostCommitHook>>,
        checkout: CheckoutUrls,
    ) -> Self {
        Self {
            gateway,
            bookings,
            events,
            permissions,
            coupons,
            hooks,
            checkout,
        }
    }

    async fn booking(
        &self,
        asset_type: AssetType,
        booking_id: &str,
    ) -> Result<BookingRecord, PaymentError> {
        self.bookings
            .find(asset_type, booking_id)
            .await?
            .ok_or_else(|| PaymentError::BookingNotFound(booking_id.to_string()))
    }

    /// Masters decide any booking, partners their own, and employees their
    /// partner's bookings on assets they hold a grant for.
    async fn authorize_booking(
        &self,
        actor: &Actor,
        booking: &BookingRecord,
        asset_type: AssetType,
    ) -> Result<(), PaymentError> {
        let same_partner = booking.partner_id.is_some()
            && booking.partner_id.as_deref() == actor.owning_partner();
        let allowed = match actor.role {
            Role::Master | Role::System => true,
            Role::Partner => same_partner,
            Role::Employee => match booking.asset_id.as_deref() {
                Some(asset_id) if same_partner => {
                    self.permissions
                        .can_manage(&actor.id, asset_type, asset_id)
                        .await?
                }
                _ => false,
            },
            Role::Customer => false,
        };

        if allowed {
            Ok(())
        } else {
            tracing::warn!(actor_id = %actor.id, booking_id = %booking.id, "Booking access denied");
            Err(PaymentError::Forbidden("Not allowed to manage this booking"))
        }
    }

    /// Payment ids are only actionable through the booking that holds them,
    /// except for masters.
    async fn authorize_payment(&self, actor: &Actor, payment_id: &str) -> Result<(), PaymentError> {
        match self.bookings.find_by_payment_id(payment_id).await? {
            Some((booking, asset_type)) => {
                self.authorize_booking(actor, &booking, asset_type).await
            }
            None if matches!(actor.role, Role::Master | Role::System) => Ok(()),
            None => Err(PaymentError::Forbidden("Payment belongs to no booking you manage")),
        }
    }

    #[tracing::instrument(
        skip(self, input),
        fields(booking_id = %input.booking_id, asset_type = %input.asset_type)
    )]
    pub async fn create_preference(
        &self,
        input: PreferenceInput,
    ) -> Result<CheckoutPreference, PaymentError> {
        if input.amount <= Decimal::ZERO {
            return Err(PaymentError::Invalid("amount must be greater than zero".to_string()));
        }
        let booking = self.booking(input.asset_type, &input.booking_id).await?;

        let request = PreferenceRequest {
            items: vec![PreferenceItem {
                id: booking.id.clone(),
                title: input.title,
                quantity: input.quantity.unwrap_or(1),
                currency_id: self.checkout.currency.clone(),
                unit_price: input.amount,
            }],
            metadata: PaymentMetadata {
                booking_id: Some(booking.id.clone()),
                asset_type: Some(input.asset_type.as_str().to_string()),
                asset_id: booking.asset_id.clone(),
                user_id: booking.user_id.clone(),
                coupon_code: input.coupon_code,
            },
            back_urls: BackUrls {
                success: self.checkout.success_url.clone(),
                pending: self.checkout.pending_url.clone(),
                failure: self.checkout.failure_url.clone(),
            },
            auto_return: "approved".to_string(),
            external_reference: booking.id.clone(),
            notification_url: self.checkout.notification_url.clone(),
            payer: input
                .payer_email
                .or(booking.user_email.clone())
                .map(|email| PayerInfo { email }),
        };

        let key = format!(
            "pref-{}-{}-{}",
            input.asset_type,
            booking.id,
            preference_fingerprint(&request)
        );
        let preference = self.gateway.create_preference(&request, &key).await?;

        self.bookings
            .update_payment(
                input.asset_type,
                &booking.id,
                &PaymentUpdate {
                    payment_status: Some(PaymentStatus::Pending),
                    mp_preference_id: Some(preference.id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(preference_id = %preference.id, "Checkout preference created");
        Ok(CheckoutPreference {
            preference_id: preference.id,
            redirect_url: preference.sandbox_init_point.or(preference.init_point),
        })
    }

    /// Authorize a card-token payment. Capture is always a separate step.
    #[tracing::instrument(
        skip(self, input),
        fields(booking_id = %input.booking_id, asset_type = %input.asset_type)
    )]
    pub async fn create_payment(&self, input: PaymentInput) -> Result<PaymentResult, PaymentError> {
        if input.amount <= Decimal::ZERO {
            return Err(PaymentError::Invalid("amount must be greater than zero".to_string()));
        }
        let booking = self.booking(input.asset_type, &input.booking_id).await?;
        let email = input
            .payer_email
            .or(booking.user_email.clone())
            .ok_or_else(|| PaymentError::Invalid("payer email is required".to_string()))?;

        let request = PaymentRequest {
            transaction_amount: input.amount,
            description: input
                .description
                .unwrap_or_else(|| format!("Booking {}", booking.id)),
            installments: input.installments.unwrap_or(1),
            payment_method_id: input.payment_method_id,
            payer: PayerInfo { email },
            capture: false,
            external_reference: booking.id.clone(),
            metadata: PaymentMetadata {
                booking_id: Some(booking.id.clone()),
                asset_type: Some(input.asset_type.as_str().to_string()),
                asset_id: booking.asset_id.clone(),
                user_id: booking.user_id.clone(),
                coupon_code: None,
            },
            notification_url: self.checkout.notification_url.clone(),
            token: input.token,
        };

        let key = format!(
            "pay-{}-{}-{}",
            input.asset_type,
            booking.id,
            fingerprint(&request.token)
        );
        let payment = self.gateway.create_payment(&request, &key).await?;
        let status = PaymentStatus::from_gateway(&payment.status);

        self.bookings
            .update_payment(
                input.asset_type,
                &booking.id,
                &PaymentUpdate {
                    payment_status: Some(status.clone()),
                    mp_payment_id: Some(payment.id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(payment_id = %payment.id, status = %status, "Payment authorized");
        Ok(PaymentResult {
            payment_id: payment.id,
            payment_status: status,
            gateway_status: payment.status,
        })
    }

    /// Mirror a gateway payment's status onto the booking that holds it, if any.
    async fn sync_payment_status(
        &self,
        payment_id: &str,
        status: &PaymentStatus,
    ) -> Result<(), PaymentError> {
        if let Some((booking, asset_type)) = self.bookings.find_by_payment_id(payment_id).await? {
            self.bookings
                .update_payment(
                    asset_type,
                    &booking.id,
                    &PaymentUpdate {
                        payment_status: Some(status.clone()),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn capture_payment(
        &self,
        actor: &Actor,
        payment_id: &str,
        amount: Option<Decimal>,
    ) -> Result<PaymentResult, PaymentError> {
        self.authorize_payment(actor, payment_id).await?;
        let payment = self.gateway.capture_payment(payment_id, amount).await?;
        let status = PaymentStatus::from_gateway(&payment.status);
        self.sync_payment_status(&payment.id, &status).await?;

        Ok(PaymentResult {
            payment_id: payment.id,
            payment_status: status,
            gateway_status: payment.status,
        })
    }

    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn cancel_payment(
        &self,
        actor: &Actor,
        payment_id: &str,
    ) -> Result<PaymentResult, PaymentError> {
        self.authorize_payment(actor, payment_id).await?;
        let payment = self.gateway.cancel_payment(payment_id).await?;
        let status = PaymentStatus::from_gateway(&payment.status);
        self.sync_payment_status(&payment.id, &status).await?;

        Ok(PaymentResult {
            payment_id: payment.id,
            payment_status: status,
            gateway_status: payment.status,
        })
    }

    /// Refund a captured payment and append the outcome to the owning booking.
    #[tracing::instrument(skip(self, actor, reason), fields(actor_id = %actor.id))]
    pub async fn create_refund(
        &self,
        actor: &Actor,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<RefundEntry, PaymentError> {
        self.authorize_payment(actor, payment_id).await?;
        self.refund(payment_id, amount, reason).await
    }

    async fn refund(
        &self,
        payment_id: &str,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<RefundEntry, PaymentError> {
        if amount.is_some_and(|a| a <= Decimal::ZERO) {
            return Err(PaymentError::Invalid(
                "refund amount must be greater than zero".to_string(),
            ));
        }

        let key = uuid::Uuid::new_v4().to_string();
        let refund = self.gateway.create_refund(payment_id, amount, &key).await?;

        let now = Utc::now();
        let entry = RefundEntry {
            refund_id: refund.id.clone(),
            amount: refund.amount.or(amount),
            reason,
            status: refund.status.clone().unwrap_or_else(|| "pending".to_string()),
            created_at: now,
            processed_at: refund.is_approved().then_some(now),
        };

        match self.bookings.find_by_payment_id(payment_id).await? {
            Some((booking, asset_type)) => {
                self.bookings
                    .push_refund(asset_type, &booking.id, &entry)
                    .await?;
            }
            None => tracing::warn!("Refund issued for a payment no booking references"),
        }

        tracing::info!(refund_id = %entry.refund_id, status = %entry.status, "Refund created");
        Ok(entry)
    }

    /// First phase of approval: make sure the booking's money is captured.
    async fn ensure_captured(
        &self,
        booking: &BookingRecord,
    ) -> Result<CaptureReceipt, PaymentError> {
        if booking.payment_status.is_captured() {
            return Ok(CaptureReceipt {
                payment_status: PaymentStatus::Paid,
            });
        }
        if !booking.payment_status.is_capturable() {
            return Err(PaymentError::NotApprovable(booking.payment_status.clone()));
        }

        let payment_id = booking
            .mp_payment_id
            .as_deref()
            .ok_or(PaymentError::NoPaymentToCapture)?;
        let payment = self.gateway.capture_payment(payment_id, None).await?;

        let status = PaymentStatus::from_gateway(&payment.status);
        if !status.is_captured() {
            return Err(PaymentError::CaptureNotConfirmed(payment.status));
        }
        Ok(CaptureReceipt {
            payment_status: status,
        })
    }

    /// Capture, then confirm. A failed capture leaves the booking untouched.
    #[tracing::instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn approve_booking(
        &self,
        actor: &Actor,
        asset_type: AssetType,
        booking_id: &str,
    ) -> Result<BookingRecord, PaymentError> {
        let mut booking = self.booking(asset_type, booking_id).await?;
        self.authorize_booking(actor, &booking, asset_type).await?;
        let receipt = self.ensure_captured(&booking).await?;

        self.bookings
            .set_status(
                asset_type,
                booking_id,
                BookingStatus::Confirmed,
                &receipt.payment_status,
            )
            .await?;
        booking.status = BookingStatus::Confirmed;
        booking.payment_status = receipt.payment_status;

        tracing::info!("Booking approved");
        run_hooks(
            &self.hooks,
            &BookingEvent {
                kind: BookingEventKind::Confirmed,
                booking: booking.clone(),
                asset_type,
                reason: None,
            },
        )
        .await;

        Ok(booking)
    }

    /// Release or refund the payment, then cancel. Gateway failures are logged;
    /// the cancellation stands regardless.
    #[tracing::instrument(skip(self, actor, reason), fields(actor_id = %actor.id))]
    pub async fn reject_booking(
        &self,
        actor: &Actor,
        asset_type: AssetType,
        booking_id: &str,
        reason: Option<String>,
    ) -> Result<BookingRecord, PaymentError> {
        let mut booking = self.booking(asset_type, booking_id).await?;
        self.authorize_booking(actor, &booking, asset_type).await?;
        let was_captured = booking.payment_status.is_captured();

        if let Some(payment_id) = booking.mp_payment_id.as_deref() {
            if booking.payment_status.is_capturable() {
                if let Err(e) = self.gateway.cancel_payment(payment_id).await {
                    tracing::error!(payment_id, error = %e, "Failed to release payment hold");
                }
            } else if was_captured {
                if let Err(e) = self.refund(payment_id, None, reason.clone()).await {
                    tracing::error!(payment_id, error = %e, "Failed to refund payment");
                }
            }
        }

        self.bookings
            .set_status(
                asset_type,
                booking_id,
                BookingStatus::Canceled,
                &PaymentStatus::Refunded,
            )
            .await?;
        booking.status = BookingStatus::Canceled;
        booking.payment_status = PaymentStatus::Refunded;

        let settled = if was_captured {
            self.coupons
                .settle_booking(booking_id, asset_type, &PaymentStatus::Refunded)
                .await
        } else {
            self.coupons.release_booking(booking_id, asset_type).await
        };
        if let Err(e) = settled {
            tracing::error!(error = %e, "Failed to settle coupon for rejected booking");
        }

        tracing::info!("Booking rejected");
        run_hooks(
            &self.hooks,
            &BookingEvent {
                kind: BookingEventKind::Rejected,
                booking: booking.clone(),
                asset_type,
                reason,
            },
        )
        .await;

        Ok(booking)
    }

    /// Reconcile one gateway notification. Safe to call repeatedly with the
    /// same event: side effects happen at most once.
    pub async fn process_webhook(
        &self,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, PaymentError> {
        let event_id = notification.event_id().ok_or(PaymentError::MissingEventId)?;
        let span = tracing::info_span!("process_webhook", event_id = %event_id);
        self.process_event(&event_id, notification)
            .instrument(span)
            .await
    }

    async fn process_event(
        &self,
        event_id: &str,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, PaymentError> {
        if let Some(existing) = self.events.get(event_id).await? {
            if existing.processed {
                tracing::info!("Notification already processed");
                metrics::record_webhook_event("duplicate");
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
        }

        self.events
            .record(
                event_id,
                notification.event_type(),
                notification.action(),
                notification.raw(),
            )
            .await?;

        let result = match self.reconcile(event_id, notification).await {
            Ok(outcome) => self
                .events
                .mark_processed(event_id)
                .await
                .map(|_| outcome)
                .map_err(PaymentError::from),
            Err(e) => Err(e),
        };

        match &result {
            Ok(WebhookOutcome::Processed { .. }) => metrics::record_webhook_event("processed"),
            Ok(_) => metrics::record_webhook_event("ignored"),
            Err(e) => {
                tracing::error!(error = %e, "Notification processing failed");
                metrics::record_webhook_event("failed");
                if let Err(store_err) = self.events.append_error(event_id, &e.to_string()).await {
                    tracing::error!(error = %store_err, "Failed to record notification error");
                }
            }
        }
        result
    }

    async fn reconcile(
        &self,
        event_id: &str,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, PaymentError> {
        if !notification.is_payment() {
            tracing::debug!(
                event_type = ?notification.event_type(),
                "Ignoring non-payment notification"
            );
            return Ok(WebhookOutcome::Ignored);
        }
        let Some(payment_id) = notification.payment_id() else {
            tracing::warn!("Payment notification without payment id");
            return Ok(WebhookOutcome::Ignored);
        };

        let payment = match self.gateway.get_payment(&payment_id).await {
            Ok(payment) => payment,
            Err(GatewayError::MissingCredential) => {
                return Err(GatewayError::MissingCredential.into());
            }
            Err(e) => {
                // Unknown or test payments would otherwise be redelivered forever.
                tracing::warn!(
                    payment_id = %payment_id,
                    error = %e,
                    "Could not fetch notified payment"
                );
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let status = PaymentStatus::from_gateway(&payment.status);
        let metadata = &payment.metadata;
        let hinted_type = metadata
            .asset_type
            .as_deref()
            .and_then(|t| t.parse::<AssetType>().ok());

        let target = match (metadata.booking_id.as_deref(), hinted_type) {
            (Some(booking_id), Some(asset_type)) => Some((booking_id.to_string(), asset_type)),
            (Some(booking_id), None) => self
                .bookings
                .find_any_type(booking_id)
                .await?
                .map(|(b, t)| (b.id, t)),
            (None, _) => self
                .bookings
                .find_by_payment_id(&payment.id)
                .await?
                .map(|(b, t)| (b.id, t)),
        };
        let Some((booking_id, asset_type)) = target else {
            tracing::info!(payment_id = %payment.id, "Notified payment references no booking");
            return Ok(WebhookOutcome::Ignored);
        };

        let update = PaymentUpdate {
            payment_status: Some(status.clone()),
            mp_payment_id: Some(payment.id.clone()),
            mp_preference_id: payment.preference_id.clone(),
            receipt_url: payment.receipt_url(),
        };
        if !self
            .bookings
            .update_payment(asset_type, &booking_id, &update)
            .await?
        {
            tracing::warn!(
                booking_id = %booking_id,
                asset_type = %asset_type,
                "Notified booking not found"
            );
        }

        self.events
            .attach_related(
                event_id,
                &RelatedEntities {
                    booking_id: Some(booking_id.clone()),
                    asset_type: Some(asset_type),
                    asset_id: metadata.asset_id.clone(),
                },
            )
            .await?;

        self.coupons
            .settle_booking(&booking_id, asset_type, &status)
            .await?;

        tracing::info!(
            booking_id = %booking_id,
            asset_type = %asset_type,
            payment_id = %payment.id,
            payment_status = %status,
            "Booking payment reconciled"
        );
        Ok(WebhookOutcome::Processed {
            booking_id,
            payment_status: status,
        })
    }
}
