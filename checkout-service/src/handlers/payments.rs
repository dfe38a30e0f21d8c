//! Payment lifecycle and booking decision endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;

use crate::{
    middleware::ActorContext,
    models::{AssetType, BookingRecord, RefundEntry, Role},
    services::orchestrator::{CheckoutPreference, PaymentInput, PaymentResult, PreferenceInput},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct CaptureRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Money movements after checkout are back-office decisions. Ownership of the
/// booking is checked by the orchestrator.
fn require_staff(actor: &crate::models::Actor) -> Result<(), AppError> {
    match actor.role {
        Role::Master | Role::Partner | Role::Employee => Ok(()),
        _ => Err(AppError::Forbidden(anyhow::anyhow!(
            "Only back-office users may manage payments"
        ))),
    }
}

fn parse_asset_type(raw: &str) -> Result<AssetType, AppError> {
    raw.parse::<AssetType>()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))
}

pub async fn create_preference(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
    Json(input): Json<PreferenceInput>,
) -> Result<(StatusCode, Json<CheckoutPreference>), AppError> {
    let preference = state.payments.create_preference(input).await?;
    Ok((StatusCode::CREATED, Json(preference)))
}

pub async fn create_payment(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
    Json(input): Json<PaymentInput>,
) -> Result<(StatusCode, Json<PaymentResult>), AppError> {
    let result = state.payments.create_payment(input).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn capture_payment(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(payment_id): Path<String>,
    payload: Option<Json<CaptureRequest>>,
) -> Result<Json<PaymentResult>, AppError> {
    require_staff(&actor)?;
    let amount = payload.and_then(|Json(body)| body.amount);
    Ok(Json(state.payments.capture_payment(&actor, &payment_id, amount).await?))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentResult>, AppError> {
    require_staff(&actor)?;
    Ok(Json(state.payments.cancel_payment(&actor, &payment_id).await?))
}

pub async fn create_refund(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(payment_id): Path<String>,
    payload: Option<Json<RefundRequest>>,
) -> Result<(StatusCode, Json<RefundEntry>), AppError> {
    require_staff(&actor)?;
    let RefundRequest { amount, reason } = payload.map(|Json(body)| body).unwrap_or_default();
    let entry = state
        .payments
        .create_refund(&actor, &payment_id, amount, reason)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn approve_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path((asset_type, booking_id)): Path<(String, String)>,
) -> Result<Json<BookingRecord>, AppError> {
    require_staff(&actor)?;
    let asset_type = parse_asset_type(&asset_type)?;
    tracing::info!(
        booking_id = %booking_id,
        asset_type = %asset_type,
        actor_id = %actor.id,
        "Approving booking"
    );

    Ok(Json(
        state
            .payments
            .approve_booking(&actor, asset_type, &booking_id)
            .await?,
    ))
}

pub async fn reject_booking(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path((asset_type, booking_id)): Path<(String, String)>,
    payload: Option<Json<RejectRequest>>,
) -> Result<Json<BookingRecord>, AppError> {
    require_staff(&actor)?;
    let asset_type = parse_asset_type(&asset_type)?;
    let reason = payload.and_then(|Json(body)| body.reason);
    tracing::info!(
        booking_id = %booking_id,
        asset_type = %asset_type,
        actor_id = %actor.id,
        "Rejecting booking"
    );

    Ok(Json(
        state
            .payments
            .reject_booking(&actor, asset_type, &booking_id, reason)
            .await?,
    ))
}
