//! Coupon engine: eligibility, discount computation and usage accounting.

use crate::models::{
    Actor, ApplicableAsset, AssetType, AuditAction, Coupon, CouponAudience, CouponAuditLog,
    CouponDraft, CouponPatch, CouponUsage, DiscountType, FieldChange, PaymentStatus, Role,
    UsageStatus,
};
use crate::services::metrics;
use crate::services::store::{AssetPermissions, CouponStore, RecordOutcome, StoreError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Error)]
pub enum CouponError {
    #[error("Coupon not found")]
    NotFound,

    #[error("Coupon usage not found")]
    UsageNotFound,

    #[error("Coupon is inactive")]
    Inactive,

    #[error("Coupon is not valid yet")]
    NotYetValid,

    #[error("Coupon has expired")]
    Expired,

    #[error("Coupon usage limit reached")]
    LimitReached,

    #[error("Coupon usage limit for this user reached")]
    UserLimitReached,

    #[error("Coupon is not available to this user: {0}")]
    NotEligible(&'static str),

    #[error("Order value is below the coupon minimum of {0}")]
    BelowMinimum(Decimal),

    #[error("Order value is above the coupon maximum of {0}")]
    AboveMaximum(Decimal),

    #[error("Coupon does not apply to this asset")]
    NotApplicable,

    #[error("Coupon already applied to this booking")]
    AlreadyApplied,

    #[error("Coupon code already exists")]
    DuplicateCode,

    #[error("Usage is {0:?}, only applied usages can change")]
    InvalidTransition(UsageStatus),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CouponError {
    /// Label used for the `coupon_applications_total` outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            CouponError::NotFound => "not_found",
            CouponError::Inactive => "inactive",
            CouponError::NotYetValid => "not_yet_valid",
            CouponError::Expired => "expired",
            CouponError::LimitReached => "limit_reached",
            CouponError::UserLimitReached => "user_limit_reached",
            CouponError::NotEligible(_) => "not_eligible",
            CouponError::BelowMinimum(_) => "below_minimum",
            CouponError::AboveMaximum(_) => "above_maximum",
            CouponError::NotApplicable => "not_applicable",
            CouponError::AlreadyApplied => "already_applied",
            _ => "error",
        }
    }
}

impl From<CouponError> for AppError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::NotFound | CouponError::UsageNotFound => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            CouponError::Forbidden(_) => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            CouponError::AlreadyApplied
            | CouponError::DuplicateCode
            | CouponError::InvalidTransition(_) => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            CouponError::Validation(errors) => AppError::ValidationError(errors),
            CouponError::Invalid(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            CouponError::Store(e) => e.into(),
            rejection => AppError::Unprocessable(anyhow::anyhow!(rejection.to_string())),
        }
    }
}

/// A prospective purchase a coupon is evaluated against.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub code: String,
    #[serde(default)]
    pub user_id: String,
    pub booking_id: String,
    pub booking_type: AssetType,
    pub original_amount: Decimal,
    #[serde(default)]
    pub asset_type: Option<AssetType>,
    #[serde(default)]
    pub asset_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountQuote {
    pub coupon_id: String,
    pub code: String,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Activate,
    Deactivate,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub coupon_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Discount for `amount` under the coupon's rules, and the resulting final amount.
///
/// Percentage discounts keep full precision and are capped by
/// `maxDiscountAmount`. No discount exceeds the order value. Rounding to the
/// currency's cents happens when amounts are sent to the gateway.
pub fn compute_discount(coupon: &Coupon, amount: Decimal) -> (Decimal, Decimal) {
    let discount = match coupon.discount_type {
        DiscountType::Percentage => {
            let raw = amount * coupon.discount_value / Decimal::ONE_HUNDRED;
            match coupon.max_discount_amount {
                Some(cap) if raw > cap => cap,
                _ => raw,
            }
        }
        DiscountType::FixedAmount => coupon.discount_value,
    };

    let discount = discount.min(amount).max(Decimal::ZERO);
    (discount, amount - discount)
}

/// Cross-field rules that must hold after every create or update.
fn check_rules(coupon: &Coupon) -> Result<(), CouponError> {
    if coupon.discount_value <= Decimal::ZERO {
        return Err(CouponError::Invalid(
            "discountValue must be greater than zero".to_string(),
        ));
    }
    if coupon.discount_type == DiscountType::Percentage
        && coupon.discount_value > Decimal::ONE_HUNDRED
    {
        return Err(CouponError::Invalid(
            "percentage discountValue cannot exceed 100".to_string(),
        ));
    }
    if coupon.max_discount_amount.is_some_and(|cap| cap <= Decimal::ZERO) {
        return Err(CouponError::Invalid(
            "maxDiscountAmount must be greater than zero".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (coupon.minimum_order_value, coupon.maximum_order_value) {
        if min > max {
            return Err(CouponError::Invalid(
                "minimumOrderValue cannot exceed maximumOrderValue".to_string(),
            ));
        }
    }
    if coupon.valid_from >= coupon.valid_until {
        return Err(CouponError::Invalid(
            "validFrom must be before validUntil".to_string(),
        ));
    }
    Ok(())
}

fn check_code(code: &str) -> Result<(), CouponError> {
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !(3..=50).contains(&code.len()) || !valid_chars {
        return Err(CouponError::Invalid(
            "code must be 3-50 letters, digits, '-' or '_'".to_string(),
        ));
    }
    Ok(())
}

/// Owner check shared by every mutation.
fn authorize(actor: &Actor, coupon: &Coupon) -> Result<(), CouponError> {
    let allowed = match actor.role {
        Role::Master | Role::System => true,
        Role::Partner => coupon.partner_id.as_deref() == Some(actor.id.as_str()),
        Role::Employee => {
            coupon.partner_id.is_some()
                && coupon.partner_id.as_deref() == actor.partner_id.as_deref()
        }
        Role::Customer => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(CouponError::Forbidden("Not allowed to manage this coupon"))
    }
}

/// Fields that change on their own and are not worth an audit diff.
const UNTRACKED_FIELDS: &[&str] = &["updatedAt", "usageCount"];

fn diff_fields(before: &Coupon, after: &Coupon) -> Vec<FieldChange> {
    let (Ok(Value::Object(old)), Ok(Value::Object(new))) =
        (serde_json::to_value(before), serde_json::to_value(after))
    else {
        return Vec::new();
    };

    new.iter()
        .filter(|(field, _)| !UNTRACKED_FIELDS.contains(&field.as_str()))
        .filter_map(|(field, new_value)| {
            let old_value = old.get(field).cloned().unwrap_or(Value::Null);
            (old_value != *new_value).then(|| FieldChange {
                field: field.clone(),
                old_value,
                new_value: new_value.clone(),
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct CouponEngine {
    store: Arc<dyn CouponStore>,
    permissions: Arc<dyn AssetPermissions>,
}

impl CouponEngine {
    pub fn new(store: Arc<dyn CouponStore>, permissions: Arc<dyn AssetPermissions>) -> Self {
        Self { store, permissions }
    }

    async fn check_asset_grants(
        &self,
        actor: &Actor,
        assets: &[ApplicableAsset],
    ) -> Result<(), CouponError> {
        if actor.role != Role::Employee {
            return Ok(());
        }
        for asset in assets {
            if !self
                .permissions
                .can_manage(&actor.id, asset.asset_type, &asset.asset_id)
                .await?
            {
                tracing::warn!(
                    employee_id = %actor.id,
                    asset_type = %asset.asset_type,
                    asset_id = %asset.asset_id,
                    "Employee lacks permission on coupon asset"
                );
                return Err(CouponError::Forbidden(
                    "No manage or edit permission on one of the coupon assets",
                ));
            }
        }
        Ok(())
    }

    async fn audit(
        &self,
        coupon_id: &str,
        action: AuditAction,
        performed_by: &str,
    ) -> Result<(), CouponError> {
        self.store
            .append_audit(&CouponAuditLog::new(coupon_id, action, performed_by))
            .await?;
        Ok(())
    }

    /// Coupon by id, hiding soft-deleted ones.
    async fn load(&self, id: &str) -> Result<Coupon, CouponError> {
        self.store
            .find_coupon(id)
            .await?
            .filter(|c| !c.is_deleted())
            .ok_or(CouponError::NotFound)
    }

    async fn load_for_mutation(&self, actor: &Actor, id: &str) -> Result<Coupon, CouponError> {
        let coupon = self.load(id).await?;
        authorize(actor, &coupon)?;
        Ok(coupon)
    }

    #[tracing::instrument(
        skip(self, draft),
        fields(actor_id = %actor.id, coupon_code = %draft.code)
    )]
    pub async fn create(&self, actor: &Actor, draft: CouponDraft) -> Result<Coupon, CouponError> {
        draft.validate()?;

        let partner_id = match actor.role {
            Role::Master | Role::System => draft.partner_id.clone(),
            Role::Partner => Some(actor.id.clone()),
            Role::Employee => Some(
                actor
                    .partner_id
                    .clone()
                    .ok_or(CouponError::Forbidden("Employee is not attached to a partner"))?,
            ),
            Role::Customer => return Err(CouponError::Forbidden("Customers cannot create coupons")),
        };
        self.check_asset_grants(actor, &draft.applicable_assets).await?;

        let now = Utc::now();
        let code = normalize_code(&draft.code);
        check_code(&code)?;

        let coupon = Coupon {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            name: draft.name,
            description: draft.description,
            discount_type: draft.discount_type,
            discount_value: draft.discount_value,
            max_discount_amount: draft.max_discount_amount,
            minimum_order_value: draft.minimum_order_value,
            maximum_order_value: draft.maximum_order_value,
            usage_limit: draft.usage_limit,
            usage_count: 0,
            user_usage_limit: draft.user_usage_limit,
            valid_from: draft.valid_from,
            valid_until: draft.valid_until,
            global_application: draft.global_application,
            applicable_assets: draft.applicable_assets,
            audience: draft.audience,
            allowed_users: draft.allowed_users,
            partner_id,
            organization_id: draft.organization_id,
            is_active: draft.is_active,
            is_publicly_visible: draft.is_publicly_visible,
            stackable: draft.stackable,
            auto_apply: draft.auto_apply,
            notify_on_expiration: draft.notify_on_expiration,
            notification_sent_at: None,
            created_by: actor.id.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        };
        check_rules(&coupon)?;

        self.store.insert_coupon(&coupon).await.map_err(|e| match e {
            StoreError::Duplicate => CouponError::DuplicateCode,
            other => other.into(),
        })?;
        self.audit(
            &coupon.id,
            AuditAction::Created {
                code: coupon.code.clone(),
                duplicated_from: None,
            },
            &actor.id,
        )
        .await?;

        tracing::info!(coupon_id = %coupon.id, "Coupon created");
        Ok(coupon)
    }

    pub async fn get(&self, actor: &Actor, id: &str) -> Result<Coupon, CouponError> {
        self.load_for_mutation(actor, id).await
    }

    #[tracing::instrument(skip(self, patch), fields(actor_id = %actor.id))]
    pub async fn update(
        &self,
        actor: &Actor,
        id: &str,
        patch: CouponPatch,
    ) -> Result<Coupon, CouponError> {
        patch.validate()?;
        let before = self.load_for_mutation(actor, id).await?;
        let mut coupon = before.clone();

        if let Some(assets) = &patch.applicable_assets {
            self.check_asset_grants(actor, assets).await?;
        }

        if let Some(v) = patch.name {
            coupon.name = v;
        }
        if let Some(v) = patch.description {
            coupon.description = Some(v);
        }
        if let Some(v) = patch.discount_type {
            coupon.discount_type = v;
        }
        if let Some(v) = patch.discount_value {
            coupon.discount_value = v;
        }
        if let Some(v) = patch.max_discount_amount {
            coupon.max_discount_amount = Some(v);
        }
        if let Some(v) = patch.minimum_order_value {
            coupon.minimum_order_value = Some(v);
        }
        if let Some(v) = patch.maximum_order_value {
            coupon.maximum_order_value = Some(v);
        }
        if let Some(v) = patch.usage_limit {
            coupon.usage_limit = Some(v);
        }
        if let Some(v) = patch.user_usage_limit {
            coupon.user_usage_limit = Some(v);
        }
        if let Some(v) = patch.valid_from {
            coupon.valid_from = v;
        }
        if let Some(v) = patch.valid_until {
            coupon.valid_until = v;
        }
        if let Some(v) = patch.global_application {
            coupon.global_application = v;
        }
        if let Some(v) = patch.applicable_assets {
            coupon.applicable_assets = v;
        }
        if let Some(v) = patch.audience {
            coupon.audience = v;
        }
        if let Some(v) = patch.is_publicly_visible {
            coupon.is_publicly_visible = v;
        }
        if let Some(v) = patch.stackable {
            coupon.stackable = v;
        }
        if let Some(v) = patch.auto_apply {
            coupon.auto_apply = v;
        }
        if let Some(v) = patch.notify_on_expiration {
            coupon.notify_on_expiration = v;
        }
        check_rules(&coupon)?;

        let changes = diff_fields(&before, &coupon);
        if changes.is_empty() {
            return Ok(before);
        }

        coupon.updated_at = Utc::now();
        self.store.save_coupon_settings(&coupon).await?;
        self.audit(&coupon.id, AuditAction::Updated { changes }, &actor.id)
            .await?;

        Ok(coupon)
    }

    /// Activate or deactivate. Setting the current state again is a no-op.
    pub async fn set_active(
        &self,
        actor: &Actor,
        id: &str,
        active: bool,
        reason: Option<String>,
    ) -> Result<Coupon, CouponError> {
        let mut coupon = self.load_for_mutation(actor, id).await?;
        if coupon.is_active == active {
            return Ok(coupon);
        }

        coupon.is_active = active;
        coupon.updated_at = Utc::now();
        self.store.save_coupon_settings(&coupon).await?;

        let action = if active {
            AuditAction::Activated { reason }
        } else {
            AuditAction::Deactivated { reason }
        };
        self.audit(&coupon.id, action, &actor.id).await?;

        tracing::info!(coupon_id = %coupon.id, is_active = active, "Coupon toggled");
        Ok(coupon)
    }

    pub async fn assign_users(
        &self,
        actor: &Actor,
        id: &str,
        users: Vec<String>,
    ) -> Result<Coupon, CouponError> {
        let before = self.load_for_mutation(actor, id).await?;
        let mut coupon = before.clone();

        let mut users: Vec<String> = users
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        users.sort();
        users.dedup();
        coupon.allowed_users = users;

        let changes = diff_fields(&before, &coupon);
        if changes.is_empty() {
            return Ok(before);
        }

        coupon.updated_at = Utc::now();
        self.store.save_coupon_settings(&coupon).await?;
        self.audit(&coupon.id, AuditAction::Updated { changes }, &actor.id)
            .await?;
        Ok(coupon)
    }

    /// Soft delete. Usage history stays in place.
    pub async fn delete(
        &self,
        actor: &Actor,
        id: &str,
        reason: Option<String>,
    ) -> Result<(), CouponError> {
        let mut coupon = self.load_for_mutation(actor, id).await?;

        let now = Utc::now();
        coupon.is_active = false;
        coupon.deleted_at = Some(now);
        coupon.deleted_by = Some(actor.id.clone());
        coupon.updated_at = now;
        self.store.save_coupon_settings(&coupon).await?;
        self.audit(&coupon.id, AuditAction::Deleted { reason }, &actor.id)
            .await?;

        tracing::info!(coupon_id = %coupon.id, "Coupon deleted");
        Ok(())
    }

    /// Clone a coupon under a new code. The copy starts inactive with no usage.
    pub async fn duplicate(
        &self,
        actor: &Actor,
        id: &str,
        new_code: &str,
    ) -> Result<Coupon, CouponError> {
        let original = self.load_for_mutation(actor, id).await?;
        let code = normalize_code(new_code);
        check_code(&code)?;

        let now = Utc::now();
        let copy = Coupon {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            usage_count: 0,
            is_active: false,
            notification_sent_at: None,
            created_by: actor.id.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
            ..original.clone()
        };

        self.store.insert_coupon(&copy).await.map_err(|e| match e {
            StoreError::Duplicate => CouponError::DuplicateCode,
            other => other.into(),
        })?;
        self.audit(
            &copy.id,
            AuditAction::Created {
                code: copy.code.clone(),
                duplicated_from: Some(original.id.clone()),
            },
            &actor.id,
        )
        .await?;

        Ok(copy)
    }

    /// Apply one action to many coupons, each independently.
    pub async fn bulk(
        &self,
        actor: &Actor,
        ids: &[String],
        action: BulkAction,
        reason: Option<String>,
    ) -> Vec<BulkResult> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = match action {
                BulkAction::Activate => self
                    .set_active(actor, id, true, reason.clone())
                    .await
                    .map(|_| ()),
                BulkAction::Deactivate => self
                    .set_active(actor, id, false, reason.clone())
                    .await
                    .map(|_| ()),
                BulkAction::Delete => self.delete(actor, id, reason.clone()).await,
            };

            results.push(match outcome {
                Ok(()) => BulkResult {
                    coupon_id: id.clone(),
                    success: true,
                    error: None,
                },
                Err(e) => BulkResult {
                    coupon_id: id.clone(),
                    success: false,
                    error: Some(e.to_string()),
                },
            });
        }
        results
    }

    async fn resolve(&self, code: &str) -> Result<Coupon, CouponError> {
        self.store
            .find_coupon_by_code(&normalize_code(code))
            .await?
            .filter(|c| !c.is_deleted())
            .ok_or(CouponError::NotFound)
    }

    async fn check_audience(&self, coupon: &Coupon, user_id: &str) -> Result<(), CouponError> {
        let listed = coupon.allowed_users.iter().any(|u| u == user_id);
        if !coupon.allowed_users.is_empty() && !listed {
            return Err(CouponError::NotEligible("user is not on the allow-list"));
        }

        match coupon.audience {
            CouponAudience::Public => Ok(()),
            CouponAudience::Private if listed => Ok(()),
            CouponAudience::Private => Err(CouponError::NotEligible("coupon is private")),
            CouponAudience::FirstPurchase => {
                if self.store.count_user_usages_any(user_id).await? > 0 {
                    Err(CouponError::NotEligible("coupon is for first purchases only"))
                } else {
                    Ok(())
                }
            }
            CouponAudience::ReturningCustomer => {
                if self.store.count_user_usages_any(user_id).await? == 0 {
                    Err(CouponError::NotEligible("coupon is for returning customers only"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Ordered eligibility checks, stopping at the first failure.
    async fn evaluate(
        &self,
        coupon: &Coupon,
        request: &ApplyRequest,
        now: DateTime<Utc>,
    ) -> Result<DiscountQuote, CouponError> {
        if !coupon.is_active {
            return Err(CouponError::Inactive);
        }
        if now < coupon.valid_from {
            return Err(CouponError::NotYetValid);
        }
        if now > coupon.valid_until {
            return Err(CouponError::Expired);
        }
        if coupon
            .usage_limit
            .is_some_and(|limit| coupon.usage_count >= limit)
        {
            return Err(CouponError::LimitReached);
        }
        if let Some(limit) = coupon.user_usage_limit {
            let used = self
                .store
                .count_user_usages(&coupon.id, &request.user_id)
                .await?;
            if used as i64 >= limit {
                return Err(CouponError::UserLimitReached);
            }
        }
        self.check_audience(coupon, &request.user_id).await?;
        if let Some(min) = coupon.minimum_order_value {
            if request.original_amount < min {
                return Err(CouponError::BelowMinimum(min));
            }
        }
        if let Some(max) = coupon.maximum_order_value {
            if request.original_amount > max {
                return Err(CouponError::AboveMaximum(max));
            }
        }
        if let Some(asset_type) = request.asset_type {
            if !coupon.applies_to(asset_type, request.asset_id.as_deref()) {
                return Err(CouponError::NotApplicable);
            }
        }

        let (discount_amount, final_amount) = compute_discount(coupon, request.original_amount);
        Ok(DiscountQuote {
            coupon_id: coupon.id.clone(),
            code: coupon.code.clone(),
            original_amount: request.original_amount,
            discount_amount,
            final_amount,
        })
    }

    /// Eligibility and discount preview. Records nothing.
    pub async fn validate(&self, request: &ApplyRequest) -> Result<DiscountQuote, CouponError> {
        if request.original_amount < Decimal::ZERO {
            return Err(CouponError::Invalid("originalAmount cannot be negative".to_string()));
        }
        let coupon = self.resolve(&request.code).await?;
        self.evaluate(&coupon, request, Utc::now()).await
    }

    #[tracing::instrument(
        skip(self, request),
        fields(
            coupon_code = %request.code,
            booking_id = %request.booking_id,
            booking_type = %request.booking_type,
            user_id = %request.user_id
        )
    )]
    pub async fn apply(&self, request: &ApplyRequest) -> Result<CouponUsage, CouponError> {
        let result = self.apply_inner(request).await;
        match &result {
            Ok(_) => metrics::record_coupon_application("applied"),
            Err(e) => {
                tracing::info!(reason = %e, "Coupon application rejected");
                metrics::record_coupon_application(e.outcome());
            }
        }
        result
    }

    async fn apply_inner(&self, request: &ApplyRequest) -> Result<CouponUsage, CouponError> {
        let quote = self.validate(request).await?;
        let coupon = self.resolve(&request.code).await?;

        if self
            .store
            .find_active_usage_for_booking(&request.booking_id, request.booking_type)
            .await?
            .is_some()
        {
            return Err(CouponError::AlreadyApplied);
        }

        let usage = CouponUsage {
            id: uuid::Uuid::new_v4().to_string(),
            coupon_id: coupon.id.clone(),
            coupon_code: coupon.code.clone(),
            user_id: request.user_id.clone(),
            booking_id: request.booking_id.clone(),
            booking_type: request.booking_type,
            original_amount: quote.original_amount,
            discount_amount: quote.discount_amount,
            final_amount: quote.final_amount,
            status: UsageStatus::Applied,
            created_at: Utc::now(),
            refunded_at: None,
            refund_reason: None,
            cancelled_at: None,
        };

        let usage_count = match self.store.record_usage(&usage, coupon.usage_limit).await? {
            RecordOutcome::Recorded { usage_count } => usage_count,
            RecordOutcome::AlreadyApplied => return Err(CouponError::AlreadyApplied),
            RecordOutcome::LimitReached => return Err(CouponError::LimitReached),
        };

        self.audit(
            &coupon.id,
            AuditAction::Applied {
                usage_id: usage.id.clone(),
                user_id: usage.user_id.clone(),
                booking_id: usage.booking_id.clone(),
                booking_type: usage.booking_type,
                original_amount: usage.original_amount,
                discount_amount: usage.discount_amount,
                final_amount: usage.final_amount,
            },
            &usage.user_id,
        )
        .await?;

        if let Some(limit) = coupon.usage_limit {
            if usage_count >= limit {
                self.audit(
                    &coupon.id,
                    AuditAction::UsageLimitReached { usage_limit: limit },
                    "system:coupon-engine",
                )
                .await?;
            }
        }

        tracing::info!(
            usage_id = %usage.id,
            discount_amount = %usage.discount_amount,
            "Coupon applied"
        );
        Ok(usage)
    }

    /// Usage plus an authorization check against its coupon.
    async fn load_usage(&self, actor: &Actor, usage_id: &str) -> Result<CouponUsage, CouponError> {
        let usage = self
            .store
            .find_usage(usage_id)
            .await?
            .ok_or(CouponError::UsageNotFound)?;

        // Deleted coupons keep their history, so ownership is checked on them too.
        match self.store.find_coupon(&usage.coupon_id).await? {
            Some(coupon) => authorize(actor, &coupon)?,
            None if matches!(actor.role, Role::Master | Role::System) => {}
            None => return Err(CouponError::Forbidden("Not allowed to manage this coupon")),
        }

        if usage.status != UsageStatus::Applied {
            return Err(CouponError::InvalidTransition(usage.status));
        }
        Ok(usage)
    }

    #[tracing::instrument(skip(self, reason), fields(actor_id = %actor.id))]
    pub async fn refund_usage(
        &self,
        actor: &Actor,
        usage_id: &str,
        reason: Option<String>,
    ) -> Result<CouponUsage, CouponError> {
        let usage = self.load_usage(actor, usage_id).await?;
        let refunded = self
            .store
            .transition_usage(
                &usage.id,
                UsageStatus::Applied,
                UsageStatus::Refunded,
                reason.clone(),
            )
            .await?
            .ok_or(CouponError::InvalidTransition(usage.status))?;

        self.audit(
            &refunded.coupon_id,
            AuditAction::Refunded {
                usage_id: refunded.id.clone(),
                user_id: refunded.user_id.clone(),
                booking_id: refunded.booking_id.clone(),
                booking_type: refunded.booking_type,
                original_amount: refunded.original_amount,
                discount_amount: refunded.discount_amount,
                final_amount: refunded.final_amount,
                reason,
            },
            &actor.id,
        )
        .await?;

        tracing::info!(booking_id = %refunded.booking_id, "Coupon usage refunded");
        Ok(refunded)
    }

    /// Cancel an applied usage before the booking settles.
    #[tracing::instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn cancel_usage(
        &self,
        actor: &Actor,
        usage_id: &str,
    ) -> Result<CouponUsage, CouponError> {
        let usage = self.load_usage(actor, usage_id).await?;
        let cancelled = self
            .store
            .transition_usage(&usage.id, UsageStatus::Applied, UsageStatus::Cancelled, None)
            .await?
            .ok_or(CouponError::InvalidTransition(usage.status))?;

        tracing::info!(booking_id = %cancelled.booking_id, "Coupon usage cancelled");
        Ok(cancelled)
    }

    /// Follow a booking's payment outcome: refunds and chargebacks refund the
    /// applied usage. A failed or cancelled attempt leaves the usage in place,
    /// since the same booking may still be paid by a later attempt.
    pub async fn settle_booking(
        &self,
        booking_id: &str,
        booking_type: AssetType,
        payment_status: &PaymentStatus,
    ) -> Result<Option<CouponUsage>, CouponError> {
        if !matches!(
            payment_status,
            PaymentStatus::Refunded | PaymentStatus::ChargedBack
        ) {
            return Ok(None);
        }
        let Some(usage) = self.applied_usage(booking_id, booking_type).await? else {
            return Ok(None);
        };

        let actor = Actor::system("payment-settlement");
        let reason = Some(format!("payment {}", payment_status));
        Ok(Some(self.refund_usage(&actor, &usage.id, reason).await?))
    }

    /// Give back the coupon slot of a booking cancelled before its payment was
    /// captured. No applied usage is a no-op.
    pub async fn release_booking(
        &self,
        booking_id: &str,
        booking_type: AssetType,
    ) -> Result<Option<CouponUsage>, CouponError> {
        let Some(usage) = self.applied_usage(booking_id, booking_type).await? else {
            return Ok(None);
        };
        let actor = Actor::system("booking-cancellation");
        Ok(Some(self.cancel_usage(&actor, &usage.id).await?))
    }

    async fn applied_usage(
        &self,
        booking_id: &str,
        booking_type: AssetType,
    ) -> Result<Option<CouponUsage>, CouponError> {
        Ok(self
            .store
            .find_active_usage_for_booking(booking_id, booking_type)
            .await?
            .filter(|u| u.status == UsageStatus::Applied))
    }

    pub async fn list_usages(
        &self,
        actor: &Actor,
        coupon_id: &str,
    ) -> Result<Vec<CouponUsage>, CouponError> {
        let coupon = self
            .store
            .find_coupon(coupon_id)
            .await?
            .ok_or(CouponError::NotFound)?;
        authorize(actor, &coupon)?;
        Ok(self.store.list_usages(coupon_id).await?)
    }

    pub async fn audit_log(
        &self,
        actor: &Actor,
        coupon_id: &str,
    ) -> Result<Vec<CouponAuditLog>, CouponError> {
        let coupon = self
            .store
            .find_coupon(coupon_id)
            .await?
            .ok_or(CouponError::NotFound)?;
        authorize(actor, &coupon)?;
        Ok(self.store.list_audit(coupon_id).await?)
    }

    /// Record an `expired` entry for coupons past their window that asked to
    /// be notified. Returns the ids handled by this call.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<String>, CouponError> {
        let mut expired = Vec::new();
        for coupon in self.store.find_expiry_candidates().await? {
            if coupon.valid_until >= now {
                continue;
            }
            if !self.store.mark_expiry_notified(&coupon.id, now).await? {
                continue;
            }
            self.audit(
                &coupon.id,
                AuditAction::Expired {
                    valid_until: coupon.valid_until,
                },
                "system:expiry",
            )
            .await?;
            expired.push(coupon.id);
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired coupons recorded");
        }
        Ok(expired)
    }
}
