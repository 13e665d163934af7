use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::models::to_display;

/// One signed ledger entry. `points` is positive for `earned` and negative
/// for `deducted`; the balance is always the algebraic sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsTransaction {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub points: i64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub ts: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Earned,
    Deducted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPoints {
    pub user_id: String,
    pub total_points: i64,
    pub transactions: Vec<PointsTransaction>,
}

impl UserPoints {
    pub fn from_row(row: &PgRow) -> Self {
        let transactions: Vec<PointsTransaction> = row
            .get::<Option<serde_json::Value>, _>("transactions")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        Self {
            user_id: row.get("user_id"),
            total_points: row.get("total_points"),
            transactions,
        }
    }

    pub fn empty(user_id: String) -> Self {
        Self {
            user_id,
            total_points: 0,
            transactions: Vec::new(),
        }
    }
}

/// Points earned when a registration turns into admission value.
/// Free events earn a flat 2; paid events earn ceil(amount / 10000) + 2,
/// where 10000 minor units are 100 major.
pub fn registration_points(price_minor_units: i64) -> i64 {
    if price_minor_units <= 0 {
        2
    } else {
        (price_minor_units + 9_999) / 10_000 + 2
    }
}

pub fn new_transaction(
    kind: TransactionKind,
    points: i64,
    reason: String,
    actor: Option<String>,
) -> PointsTransaction {
    PointsTransaction {
        kind,
        points,
        reason,
        actor,
        ts: to_display(Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_events_earn_two() {
        assert_eq!(registration_points(0), 2);
        assert_eq!(registration_points(-1), 2);
    }

    #[test]
    fn paid_events_earn_ceil_plus_two() {
        assert_eq!(registration_points(50_000), 7);
        assert_eq!(registration_points(10_000), 3);
        assert_eq!(registration_points(10_001), 4);
        assert_eq!(registration_points(1), 3);
        assert_eq!(registration_points(100_000), 12);
    }

    #[test]
    fn transaction_kind_serializes_lowercase() {
        let tx = new_transaction(TransactionKind::Deducted, -5, "adjustment".into(), Some("usr_admin".into()));
        let v = serde_json::to_value(&tx).unwrap();
        assert_eq!(v["type"], "deducted");
        assert_eq!(v["points"], -5);
        assert_eq!(v["actor"], "usr_admin");
    }
}
