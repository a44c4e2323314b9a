//! Time utility functions

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

/// Parse an ISO 8601 / RFC 3339 timestamp string to DateTime<Utc>.
///
/// Returns `None` when the string does not parse; callers decide the
/// fallback (usually the source row's created_at).
pub fn parse_iso_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Parse a date string in the formats upstream actually sends: RFC 3339
/// (with or without offset), `YYYY-MM-DD`, or `MM/DD/YYYY`.
pub fn parse_flexible_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let trimmed = ts.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(dt) = parse_iso_timestamp(trimmed) {
        return Some(dt);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, format) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    None
}

/// Truncate a timestamp to midnight UTC.
pub fn midnight_utc(dt: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(dt.year(), dt.month(), dt.day(), 0, 0, 0)
        .single()
        .unwrap_or(dt)
}

/// Calculate the SLA due date for a received date.
///
/// The received date is normalized to midnight UTC, then 48 hours are added
/// for expedited submissions and 72 hours otherwise. The result lands on a
/// midnight boundary.
pub fn calculate_due_date(received: DateTime<Utc>, expedited: bool) -> DateTime<Utc> {
    let sla_hours = if expedited { 48 } else { 72 };
    midnight_utc(received) + Duration::hours(sla_hours)
}
