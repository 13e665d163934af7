use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::models::to_display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl JoinRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinRequestStatus::Pending => "pending",
            JoinRequestStatus::Accepted => "accepted",
            JoinRequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<JoinRequestStatus> {
        match s {
            "pending" => Some(JoinRequestStatus::Pending),
            "accepted" => Some(JoinRequestStatus::Accepted),
            "rejected" => Some(JoinRequestStatus::Rejected),
            _ => None,
        }
    }
}

/// Approval-gated intent to register. One row per (user, event); a rejected
/// request is revived in place rather than duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventJoinRequest {
    pub id: String,
    pub user_id: String,
    pub event_id: String,
    pub status: JoinRequestStatus,
    pub requested_at: DateTime<FixedOffset>,
    pub reviewed_at: Option<DateTime<FixedOffset>>,
    pub reviewed_by: Option<String>,
}

impl EventJoinRequest {
    pub fn from_row(row: &PgRow) -> Self {
        let status = JoinRequestStatus::parse(&row.get::<String, _>("status"))
            .unwrap_or(JoinRequestStatus::Pending);
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            event_id: row.get("event_id"),
            status,
            requested_at: to_display(row.get::<DateTime<Utc>, _>("requested_at")),
            reviewed_at: row
                .get::<Option<DateTime<Utc>>, _>("reviewed_at")
                .map(to_display),
            reviewed_by: row.get("reviewed_by"),
        }
    }
}
