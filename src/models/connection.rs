use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::models::to_display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Blocked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Accepted => "accepted",
            ConnectionStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<ConnectionStatus> {
        match s {
            "pending" => Some(ConnectionStatus::Pending),
            "accepted" => Some(ConnectionStatus::Accepted),
            "blocked" => Some(ConnectionStatus::Blocked),
            _ => None,
        }
    }
}

/// A directed edge from requester to target. "Connected" is symmetric:
/// an accepted edge in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub requester_id: String,
    pub target_id: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl Connection {
    pub fn from_row(row: &PgRow) -> Self {
        let status = ConnectionStatus::parse(&row.get::<String, _>("status"))
            .unwrap_or(ConnectionStatus::Pending);
        Self {
            id: row.get("id"),
            requester_id: row.get("requester_id"),
            target_id: row.get("target_id"),
            status,
            created_at: to_display(row.get::<DateTime<Utc>, _>("created_at")),
            updated_at: to_display(row.get::<DateTime<Utc>, _>("updated_at")),
        }
    }
}
