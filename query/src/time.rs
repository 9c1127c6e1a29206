//! Time helpers. All times are UNIX seconds in UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Parses `YYYYMMDDTHHMMSS[Z]`, `YYYYMMDD` or RFC 3339.
pub fn parse_time(text: &str) -> Option<i64> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp());
    }

    let basic = text.strip_suffix('Z').unwrap_or(text);
    if let Ok(dt) = NaiveDateTime::parse_from_str(basic, "%Y%m%dT%H%M%S") {
        return Some(dt.and_utc().timestamp());
    }

    NaiveDate::parse_from_str(text, "%Y%m%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// UTC midnight at or before `t`.
pub fn day_begin(t: i64) -> i64 {
    t.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

/// The UTC midnight following `t`'s day.
pub fn day_end(t: i64) -> i64 {
    day_begin(t).saturating_add(SECONDS_PER_DAY)
}

pub fn add_days(t: i64, days: i64) -> i64 {
    t.saturating_add(days.saturating_mul(SECONDS_PER_DAY))
}
