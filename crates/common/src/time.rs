//! Wall-clock helpers shared by audit logging and stored documents.

use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    let now: DateTime<Utc> = Utc::now();
    now.timestamp_millis().max(0) as u64
}

/// Day partition stamp (`YYYY-MM-DD`, UTC) for append-only logs.
#[must_use]
pub fn today_stamp() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Day partition stamp for an arbitrary millisecond timestamp.
#[must_use]
pub fn day_stamp(millis: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_recent() {
        // Anything after 2024-01-01 counts as a sane clock.
        assert!(now_millis() > 1_704_067_200_000);
    }

    #[test]
    fn day_stamp_formats_utc() {
        // 2024-03-01T12:00:00Z
        assert_eq!(day_stamp(1_709_294_400_000), "2024-03-01");
    }

    #[test]
    fn today_stamp_matches_now() {
        assert_eq!(today_stamp(), day_stamp(now_millis()));
    }
}
