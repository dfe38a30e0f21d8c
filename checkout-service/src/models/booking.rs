use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of bookable asset. Each kind keeps its bookings in its own collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Activity,
    Event,
    Restaurant,
    Vehicle,
    Package,
}

impl AssetType {
    pub const ALL: [AssetType; 5] = [
        AssetType::Activity,
        AssetType::Event,
        AssetType::Restaurant,
        AssetType::Vehicle,
        AssetType::Package,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Activity => "activity",
            AssetType::Event => "event",
            AssetType::Restaurant => "restaurant",
            AssetType::Vehicle => "vehicle",
            AssetType::Package => "package",
        }
    }

    /// Collection holding bookings of this asset type.
    pub fn booking_collection(&self) -> &'static str {
        match self {
            AssetType::Activity => "activity_bookings",
            AssetType::Event => "event_bookings",
            AssetType::Restaurant => "restaurant_bookings",
            AssetType::Vehicle => "vehicle_bookings",
            AssetType::Package => "package_bookings",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "activity" | "activities" => Ok(AssetType::Activity),
            "event" | "events" => Ok(AssetType::Event),
            "restaurant" | "restaurants" => Ok(AssetType::Restaurant),
            "vehicle" | "vehicles" => Ok(AssetType::Vehicle),
            "package" | "packages" => Ok(AssetType::Package),
            other => Err(format!("unknown asset type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Canceled,
    Completed,
}

/// Payment state of a booking as seen by this service.
///
/// Gateway statuses are normalized through [`PaymentStatus::from_gateway`];
/// anything unrecognized is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Authorized,
    Paid,
    Processing,
    Failed,
    Cancelled,
    Refunded,
    ChargedBack,
    Other(String),
}

impl PaymentStatus {
    /// Map a Mercado Pago payment status onto the internal vocabulary.
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "approved" => PaymentStatus::Paid,
            "in_process" => PaymentStatus::Processing,
            "authorized" => PaymentStatus::Authorized,
            "rejected" => PaymentStatus::Failed,
            "cancelled" => PaymentStatus::Cancelled,
            "refunded" => PaymentStatus::Refunded,
            "charged_back" => PaymentStatus::ChargedBack,
            "pending" => PaymentStatus::Pending,
            other => PaymentStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::ChargedBack => "charged_back",
            PaymentStatus::Other(s) => s.as_str(),
        }
    }

    /// Funds are reserved but not yet charged, or the charge has not started.
    pub fn is_capturable(&self) -> bool {
        matches!(self, PaymentStatus::Authorized | PaymentStatus::Pending)
    }

    /// Money has been taken from the payer.
    pub fn is_captured(&self) -> bool {
        match self {
            PaymentStatus::Paid => true,
            PaymentStatus::Other(s) => s == "succeeded",
            _ => false,
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => PaymentStatus::Pending,
            "authorized" => PaymentStatus::Authorized,
            "paid" => PaymentStatus::Paid,
            "processing" => PaymentStatus::Processing,
            "failed" => PaymentStatus::Failed,
            "cancelled" => PaymentStatus::Cancelled,
            "refunded" => PaymentStatus::Refunded,
            "charged_back" => PaymentStatus::ChargedBack,
            _ => PaymentStatus::Other(value),
        }
    }
}

impl From<PaymentStatus> for String {
    fn from(value: PaymentStatus) -> Self {
        match value {
            PaymentStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry appended to a booking's refund history. Never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundEntry {
    pub refund_id: String,
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// The payment-related projection of a booking owned by the booking service.
///
/// Only the fields this service reads or patches are modelled; the rest of the
/// document is left untouched by the partial updates in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub asset_id: Option<String>,
    /// Partner selling the booked asset.
    #[serde(default)]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub status: BookingStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub mp_payment_id: Option<String>,
    #[serde(default)]
    pub mp_preference_id: Option<String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub refunds: Vec<RefundEntry>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BookingRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            asset_id: None,
            partner_id: None,
            user_id: None,
            user_email: None,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount: None,
            mp_payment_id: None,
            mp_preference_id: None,
            receipt_url: None,
            refunds: Vec::new(),
            updated_at: None,
        }
    }
}

/// Partial update of the payment fields of a booking.
#[derive(Debug, Clone, Default)]
pub struct PaymentUpdate {
    pub payment_status: Option<PaymentStatus>,
    pub mp_payment_id: Option<String>,
    pub mp_preference_id: Option<String>,
    pub receipt_url: Option<String>,
}
