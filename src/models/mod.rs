use chrono::{DateTime, FixedOffset, Utc};
use uuid::Uuid;

use crate::config::display_offset;

pub mod connection;
pub mod event;
pub mod join_request;
pub mod payment;
pub mod points;
pub mod ticket;
pub mod user;

/// Generate a prefixed entity id, e.g. `evt_1f2a9c0d3b`.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..10])
}

/// Convert a stored instant to the canonical display offset (+05:30).
/// The instant round-trips; only the rendered offset changes.
pub fn to_display(dt: DateTime<Utc>) -> DateTime<FixedOffset> {
    dt.with_timezone(&display_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_carry_their_prefix() {
        let id = new_id("evt");
        assert!(id.starts_with("evt_"));
        assert_eq!(id.len(), "evt_".len() + 10);
    }

    #[test]
    fn display_conversion_preserves_the_instant() {
        let utc = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let display = to_display(utc);
        assert_eq!(display.timestamp(), utc.timestamp());
        assert_eq!(display.to_rfc3339(), "2025-01-01T17:30:00+05:30");
    }
}
