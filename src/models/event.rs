use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::config::EXPIRY_GRACE_SECONDS;
use crate::models::to_display;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub city: String,
    pub venue: String,
    pub start_at: DateTime<FixedOffset>,
    pub end_at: DateTime<FixedOffset>,
    pub price_minor_units: i64,
    pub is_active: bool,
    pub requires_approval: bool,
    pub registration_open: bool,
    pub banner_url: Option<String>,
    pub organizer_name: Option<String>,
    pub organizer_logo: Option<String>,
    pub coordinate_lat: Option<String>,
    pub coordinate_long: Option<String>,
    pub address_url: Option<String>,
    pub created_at: DateTime<FixedOffset>,
}

impl Event {
    pub fn from_row(row: &PgRow) -> Self {
        Self {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            city: row.get("city"),
            venue: row.get("venue"),
            start_at: to_display(row.get::<DateTime<Utc>, _>("start_at")),
            end_at: to_display(row.get::<DateTime<Utc>, _>("end_at")),
            price_minor_units: row.get("price_minor_units"),
            is_active: row.get("is_active"),
            requires_approval: row.get("requires_approval"),
            registration_open: row.get("registration_open"),
            banner_url: row.get("banner_url"),
            organizer_name: row.get("organizer_name"),
            organizer_logo: row.get("organizer_logo"),
            coordinate_lat: row.get("coordinate_lat"),
            coordinate_long: row.get("coordinate_long"),
            address_url: row.get("address_url"),
            created_at: to_display(row.get::<DateTime<Utc>, _>("created_at")),
        }
    }

    pub fn is_free(&self) -> bool {
        self.price_minor_units == 0
    }

    /// An event has ended once its end time passes; registration and
    /// validation both treat it as closed from that moment.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_at.with_timezone(&Utc) <= now
    }

    /// Expired means ended plus the one-hour grace the sweeper honours.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_at.with_timezone(&Utc) + Duration::seconds(EXPIRY_GRACE_SECONDS) <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_ending_at(end: DateTime<Utc>) -> Event {
        Event {
            id: "evt_1".into(),
            title: "Morning Run".into(),
            description: "5k".into(),
            city: "Pune".into(),
            venue: "Riverside".into(),
            start_at: to_display(end - Duration::hours(2)),
            end_at: to_display(end),
            price_minor_units: 0,
            is_active: true,
            requires_approval: false,
            registration_open: true,
            banner_url: None,
            organizer_name: None,
            organizer_logo: None,
            coordinate_lat: None,
            coordinate_long: None,
            address_url: None,
            created_at: to_display(end - Duration::days(7)),
        }
    }

    #[test]
    fn ended_is_immediate_but_expired_waits_an_hour() {
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let ev = event_ending_at(end);

        let just_after = end + Duration::minutes(1);
        assert!(ev.has_ended(just_after));
        assert!(!ev.is_expired(just_after));

        let an_hour_later = end + Duration::hours(1);
        assert!(ev.is_expired(an_hour_later));
    }

    #[test]
    fn not_ended_before_end() {
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let ev = event_ending_at(end);
        assert!(!ev.has_ended(end - Duration::minutes(1)));
    }
}
