use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::auth::Role;
use crate::models::to_display;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub google_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub role: Role,
    pub is_private: bool,
    pub bio: Option<String>,
    pub picture_url: Option<String>,
    pub strava_link: Option<String>,
    pub instagram_id: Option<String>,
    pub subscribed_events: Vec<String>,
    pub created_at: DateTime<FixedOffset>,
}

impl User {
    pub fn from_row(row: &PgRow) -> Self {
        let subscribed_events: Vec<String> = row
            .get::<Option<serde_json::Value>, _>("subscribed_events")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let role = Role::parse(&row.get::<String, _>("role")).unwrap_or(Role::User);

        Self {
            id: row.get("id"),
            name: row.get("name"),
            phone: row.get("phone"),
            email: row.get("email"),
            google_id: row.get("google_id"),
            password_hash: row.get("password_hash"),
            role,
            is_private: row.get("is_private"),
            bio: row.get("bio"),
            picture_url: row.get("picture_url"),
            strava_link: row.get("strava_link"),
            instagram_id: row.get("instagram_id"),
            subscribed_events,
            created_at: to_display(row.get::<DateTime<Utc>, _>("created_at")),
        }
    }
}
