use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::models::to_display;

/// One validation scan. `device` and `operator` are pass-through strings
/// from the scanner; `points_awarded` marks the entry that triggered the
/// free-event earn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub ts: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<bool>,
}

/// How the ticket came to exist. Stored as a tagged JSONB blob owned
/// exclusively by the registration and payment paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TicketMeta {
    Free,
    Paid {
        amount: i64,
        order_id: String,
        payment_id: String,
    },
}

impl TicketMeta {
    pub fn payment_id(&self) -> Option<&str> {
        match self {
            TicketMeta::Free => None,
            TicketMeta::Paid { payment_id, .. } => Some(payment_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub qr_token: String,
    pub issued_at: DateTime<FixedOffset>,
    pub is_validated: bool,
    pub validated_at: Option<DateTime<FixedOffset>>,
    pub validation_history: Vec<ValidationEntry>,
    pub meta: TicketMeta,
}

impl Ticket {
    pub fn from_row(row: &PgRow) -> Self {
        let validation_history: Vec<ValidationEntry> = row
            .get::<Option<serde_json::Value>, _>("validation_history")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let meta: TicketMeta = row
            .get::<Option<serde_json::Value>, _>("meta")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(TicketMeta::Free);

        Self {
            id: row.get("id"),
            event_id: row.get("event_id"),
            user_id: row.get("user_id"),
            qr_token: row.get("qr_token"),
            issued_at: to_display(row.get::<DateTime<Utc>, _>("issued_at")),
            is_validated: row.get("is_validated"),
            validated_at: row
                .get::<Option<DateTime<Utc>>, _>("validated_at")
                .map(to_display),
            validation_history,
            meta,
        }
    }
}

/// Raw scanner submission kept for audit. Never authoritative for anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedQrToken {
    pub id: String,
    pub token: String,
    pub event_id: Option<String>,
    pub received_at: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ReceivedQrToken {
    pub fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            token: row.get("token"),
            event_id: row.get("event_id"),
            received_at: to_display(row.get::<DateTime<Utc>, _>("received_at")),
            source: row.get("source"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_tags_discriminate_kinds() {
        let free = serde_json::to_value(&TicketMeta::Free).unwrap();
        assert_eq!(free["kind"], "free");

        let paid = serde_json::to_value(&TicketMeta::Paid {
            amount: 50_000,
            order_id: "order_1".into(),
            payment_id: "pay_1".into(),
        })
        .unwrap();
        assert_eq!(paid["kind"], "paid");
        assert_eq!(paid["amount"], 50_000);
        assert_eq!(paid["payment_id"], "pay_1");

        let back: TicketMeta = serde_json::from_value(paid).unwrap();
        assert_eq!(back.payment_id(), Some("pay_1"));
    }
}
