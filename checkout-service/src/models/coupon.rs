use super::booking::AssetType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

/// Who a coupon is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CouponAudience {
    #[default]
    Public,
    Private,
    FirstPurchase,
    ReturningCustomer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalApplication {
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub asset_types: Vec<AssetType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicableAsset {
    pub asset_type: AssetType,
    pub asset_id: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Codes are letters, digits, `-` and `_` only.
fn validate_code_chars(code: &str) -> Result<(), ValidationError> {
    if code
        .trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        let mut err = ValidationError::new("code");
        err.message = Some(Cow::from("Code may only contain letters, digits, '-' and '_'."));
        Err(err)
    }
}

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_positive() && !value.is_zero() {
        Ok(())
    } else {
        let mut err = ValidationError::new("value");
        err.message = Some(Cow::from("Value must be greater than zero."));
        Err(err)
    }
}

/// A discount policy, addressed by its uppercase `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    #[serde(rename = "_id")]
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub max_discount_amount: Option<Decimal>,
    #[serde(default)]
    pub minimum_order_value: Option<Decimal>,
    #[serde(default)]
    pub maximum_order_value: Option<Decimal>,
    #[serde(default)]
    pub usage_limit: Option<i64>,
    #[serde(default)]
    pub usage_count: i64,
    #[serde(default)]
    pub user_usage_limit: Option<i64>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub global_application: GlobalApplication,
    #[serde(default)]
    pub applicable_assets: Vec<ApplicableAsset>,
    #[serde(rename = "type", default)]
    pub audience: CouponAudience,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default)]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub is_publicly_visible: bool,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default)]
    pub notify_on_expiration: bool,
    #[serde(default)]
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_by: Option<String>,
}

impl Coupon {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the coupon may be used for the given asset.
    pub fn applies_to(&self, asset_type: AssetType, asset_id: Option<&str>) -> bool {
        if self.global_application.is_global
            && self.global_application.asset_types.contains(&asset_type)
        {
            return true;
        }

        match asset_id {
            Some(asset_id) => self
                .applicable_assets
                .iter()
                .any(|a| a.is_active && a.asset_type == asset_type && a.asset_id == asset_id),
            None => false,
        }
    }
}

/// Fields accepted when creating a coupon.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CouponDraft {
    #[validate(length(min = 3, max = 50), custom(function = "validate_code_chars"))]
    pub code: String,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    #[validate(custom(function = "validate_positive"))]
    pub discount_value: Decimal,
    #[serde(default)]
    pub max_discount_amount: Option<Decimal>,
    #[serde(default)]
    pub minimum_order_value: Option<Decimal>,
    #[serde(default)]
    pub maximum_order_value: Option<Decimal>,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub usage_limit: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub user_usage_limit: Option<i64>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub global_application: GlobalApplication,
    #[serde(default)]
    pub applicable_assets: Vec<ApplicableAsset>,
    #[serde(rename = "type", default)]
    pub audience: CouponAudience,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Honoured for master users only; partners and employees get their own.
    #[serde(default)]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub is_publicly_visible: bool,
    #[serde(default)]
    pub stackable: bool,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default)]
    pub notify_on_expiration: bool,
}

/// Partial update of a coupon. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CouponPatch {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    #[validate(custom(function = "validate_positive"))]
    pub discount_value: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub minimum_order_value: Option<Decimal>,
    pub maximum_order_value: Option<Decimal>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i64>,
    #[validate(range(min = 1))]
    pub user_usage_limit: Option<i64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub global_application: Option<GlobalApplication>,
    pub applicable_assets: Option<Vec<ApplicableAsset>>,
    #[serde(rename = "type")]
    pub audience: Option<CouponAudience>,
    pub is_publicly_visible: Option<bool>,
    pub stackable: Option<bool>,
    pub auto_apply: Option<bool>,
    pub notify_on_expiration: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Applied,
    Refunded,
    Cancelled,
}

/// One application of a coupon to one booking. Amounts are frozen at
/// application time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponUsage {
    #[serde(rename = "_id")]
    pub id: String,
    pub coupon_id: String,
    pub coupon_code: String,
    pub user_id: String,
    pub booking_id: String,
    pub booking_type: AssetType,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub status: UsageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refund_reason: Option<String>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Old and new value of one coupon field, recorded on updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
}

/// What happened to a coupon, with the data relevant to that kind of event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "actionType",
    content = "actionData",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum AuditAction {
    Created {
        code: String,
        duplicated_from: Option<String>,
    },
    Updated {
        changes: Vec<FieldChange>,
    },
    Activated {
        reason: Option<String>,
    },
    Deactivated {
        reason: Option<String>,
    },
    Deleted {
        reason: Option<String>,
    },
    Applied {
        usage_id: String,
        user_id: String,
        booking_id: String,
        booking_type: AssetType,
        original_amount: Decimal,
        discount_amount: Decimal,
        final_amount: Decimal,
    },
    Refunded {
        usage_id: String,
        user_id: String,
        booking_id: String,
        booking_type: AssetType,
        original_amount: Decimal,
        discount_amount: Decimal,
        final_amount: Decimal,
        reason: Option<String>,
    },
    Expired {
        valid_until: DateTime<Utc>,
    },
    UsageLimitReached {
        usage_limit: i64,
    },
}

/// Append-only history entry for a coupon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponAuditLog {
    #[serde(rename = "_id")]
    pub id: String,
    pub coupon_id: String,
    #[serde(flatten)]
    pub action: AuditAction,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
}

impl CouponAuditLog {
    pub fn new(coupon_id: &str, action: AuditAction, performed_by: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            coupon_id: coupon_id.to_string(),
            action,
            performed_by: performed_by.to_string(),
            performed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_audit_log_shape() {
        let entry = CouponAuditLog::new(
            "c-1",
            AuditAction::Applied {
                usage_id: "u-1".to_string(),
                user_id: "user-1".to_string(),
                booking_id: "bk-1".to_string(),
                booking_type: AssetType::Activity,
                original_amount: dec!(200.00),
                discount_amount: dec!(20.00),
                final_amount: dec!(180.00),
            },
            "user-1",
        );

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["actionType"], "applied");
        assert_eq!(json["actionData"]["bookingType"], "activity");
        assert_eq!(json["couponId"], "c-1");

        let back: CouponAuditLog = serde_json::from_value(json).unwrap();
        assert_eq!(back.action, entry.action);
    }

    #[test]
    fn test_code_charset() {
        assert!(validate_code_chars("SUMMER_2024-A").is_ok());
        assert!(validate_code_chars("NO SPACES").is_err());
        assert!(validate_code_chars("CAFÉ").is_err());
    }

    #[test]
    fn test_discount_value_must_be_positive() {
        assert!(validate_positive(&dec!(0.01)).is_ok());
        assert!(validate_positive(&Decimal::ZERO).is_err());
        assert!(validate_positive(&dec!(-5)).is_err());
    }

    #[test]
    fn test_usage_limit_reached_tag() {
        let json = serde_json::to_value(AuditAction::UsageLimitReached { usage_limit: 5 }).unwrap();
        assert_eq!(json["actionType"], "usage_limit_reached");
        assert_eq!(json["actionData"]["usageLimit"], 5);
    }
}
