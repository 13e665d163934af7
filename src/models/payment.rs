use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::models::to_display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<PaymentStatus> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// pending → {processing, success, failed, cancelled};
    /// success is terminal except for refunded.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match self {
            Pending => matches!(next, Processing | Success | Failed | Cancelled),
            Processing => matches!(next, Success | Failed | Cancelled),
            Success => matches!(next, Refunded),
            Failed | Cancelled | Refunded => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: String,
    pub gateway_order_id: String,
    pub user_id: String,
    pub event_id: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub receipt: Option<String>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
    pub expires_at: Option<DateTime<FixedOffset>>,
}

impl PaymentOrder {
    pub fn from_row(row: &PgRow) -> Self {
        let status = PaymentStatus::parse(&row.get::<String, _>("status"))
            .unwrap_or(PaymentStatus::Pending);
        Self {
            id: row.get("id"),
            gateway_order_id: row.get("gateway_order_id"),
            user_id: row.get("user_id"),
            event_id: row.get("event_id"),
            amount_minor_units: row.get("amount_minor_units"),
            currency: row.get("currency"),
            status,
            receipt: row.get("receipt"),
            created_at: to_display(row.get::<DateTime<Utc>, _>("created_at")),
            updated_at: to_display(row.get::<DateTime<Utc>, _>("updated_at")),
            expires_at: row
                .get::<Option<DateTime<Utc>>, _>("expires_at")
                .map(to_display),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub gateway_payment_id: Option<String>,
    #[serde(skip_serializing)]
    pub gateway_signature: Option<String>,
    pub amount_paid: Option<i64>,
    pub currency: String,
    pub status: String,
    pub method: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub created_at: DateTime<FixedOffset>,
}

impl Payment {
    pub fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            order_id: row.get("order_id"),
            gateway_payment_id: row.get("gateway_payment_id"),
            gateway_signature: row.get("gateway_signature"),
            amount_paid: row.get("amount_paid"),
            currency: row.get("currency"),
            status: row.get("status"),
            method: row.get("method"),
            error_code: row.get("error_code"),
            error_description: row.get("error_description"),
            created_at: to_display(row.get::<DateTime<Utc>, _>("created_at")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAuditLog {
    pub id: String,
    pub order_id: String,
    pub payment_id: Option<String>,
    pub action: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<FixedOffset>,
    pub created_by: String,
}

impl PaymentAuditLog {
    pub fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            order_id: row.get("order_id"),
            payment_id: row.get("payment_id"),
            action: row.get("action"),
            old_status: row.get("old_status"),
            new_status: row.get("new_status"),
            details: row.get("details"),
            created_at: to_display(row.get::<DateTime<Utc>, _>("created_at")),
            created_by: row.get("created_by"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_fans_out_success_is_terminal() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Success));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Success.can_transition_to(Refunded));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Refunded.can_transition_to(Success));
    }
}
