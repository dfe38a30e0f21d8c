//! Coupon administration and checkout-time coupon endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::{
    middleware::ActorContext,
    models::{Actor, Coupon, CouponAuditLog, CouponDraft, CouponPatch, CouponUsage, Role},
    services::coupons::{ApplyRequest, BulkAction, BulkResult, DiscountQuote},
    AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub is_active: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignUsersRequest {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DuplicateRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub coupon_ids: Vec<String>,
    pub action: BulkAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub results: Vec<BulkResult>,
}

#[derive(Debug, Serialize)]
pub struct ExpiryResponse {
    pub expired: Vec<String>,
}

pub async fn create_coupon(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(draft): Json<CouponDraft>,
) -> Result<(StatusCode, Json<Coupon>), AppError> {
    let coupon = state.coupons.create(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
) -> Result<Json<Coupon>, AppError> {
    Ok(Json(state.coupons.get(&actor, &id).await?))
}

pub async fn update_coupon(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
    Json(patch): Json<CouponPatch>,
) -> Result<Json<Coupon>, AppError> {
    Ok(Json(state.coupons.update(&actor, &id, patch).await?))
}

pub async fn toggle_coupon(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<Coupon>, AppError> {
    let coupon = state
        .coupons
        .set_active(&actor, &id, payload.is_active, payload.reason)
        .await?;
    Ok(Json(coupon))
}

pub async fn assign_users(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
    Json(payload): Json<AssignUsersRequest>,
) -> Result<Json<Coupon>, AppError> {
    let coupon = state
        .coupons
        .assign_users(&actor, &id, payload.user_ids)
        .await?;
    Ok(Json(coupon))
}

pub async fn delete_coupon(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
    Query(query): Query<ReasonQuery>,
) -> Result<StatusCode, AppError> {
    state.coupons.delete(&actor, &id, query.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate_coupon(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
    Json(payload): Json<DuplicateRequest>,
) -> Result<(StatusCode, Json<Coupon>), AppError> {
    let coupon = state.coupons.duplicate(&actor, &id, &payload.code).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

pub async fn bulk_action(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(payload): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, AppError> {
    let results = state
        .coupons
        .bulk(&actor, &payload.coupon_ids, payload.action, payload.reason)
        .await;
    Ok(Json(BulkResponse { results }))
}

pub async fn list_usages(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
) -> Result<Json<Vec<CouponUsage>>, AppError> {
    Ok(Json(state.coupons.list_usages(&actor, &id).await?))
}

pub async fn audit_log(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
) -> Result<Json<Vec<CouponAuditLog>>, AppError> {
    Ok(Json(state.coupons.audit_log(&actor, &id).await?))
}

/// Customers always apply coupons for themselves; back-office callers may name the user.
fn for_caller(actor: &Actor, mut request: ApplyRequest) -> ApplyRequest {
    if actor.role == Role::Customer || request.user_id.trim().is_empty() {
        request.user_id = actor.id.clone();
    }
    request
}

pub async fn validate_coupon(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(request): Json<ApplyRequest>,
) -> Result<Json<DiscountQuote>, AppError> {
    let request = for_caller(&actor, request);
    Ok(Json(state.coupons.validate(&request).await?))
}

pub async fn apply_coupon(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(request): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<CouponUsage>), AppError> {
    let request = for_caller(&actor, request);
    tracing::info!(
        coupon_code = %request.code,
        booking_id = %request.booking_id,
        asset_type = %request.booking_type,
        "Applying coupon"
    );

    let usage = state.coupons.apply(&request).await?;
    Ok((StatusCode::CREATED, Json(usage)))
}

pub async fn refund_usage(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
    payload: Option<Json<ReasonBody>>,
) -> Result<Json<CouponUsage>, AppError> {
    let reason = payload.and_then(|Json(body)| body.reason);
    Ok(Json(state.coupons.refund_usage(&actor, &id, reason).await?))
}

pub async fn cancel_usage(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(id): Path<String>,
) -> Result<Json<CouponUsage>, AppError> {
    Ok(Json(state.coupons.cancel_usage(&actor, &id).await?))
}

/// Run the expiry sweep on demand. Master only.
pub async fn expire_coupons(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
) -> Result<Json<ExpiryResponse>, AppError> {
    if actor.role != Role::Master {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Only master users may run the expiry sweep"
        )));
    }
    let expired = state.coupons.expire_due(Utc::now()).await?;
    Ok(Json(ExpiryResponse { expired }))
}
