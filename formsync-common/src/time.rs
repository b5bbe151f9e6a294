//! Timestamp utilities

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, SubsecRound, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Format a timestamp for storage (RFC 3339, millisecond precision, `Z` suffix)
///
/// Fixed-width output keeps stored timestamps lexicographically ordered.
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 timestamp
pub fn from_storage(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Current time truncated to storage precision, strictly after `previous`
///
/// Keeps successive snapshot timestamps of one task strictly increasing even
/// when two writes land within the same millisecond.
pub fn next_after(previous: &DateTime<Utc>) -> DateTime<Utc> {
    let now = now().trunc_subsecs(3);
    let floor = previous.trunc_subsecs(3) + ChronoDuration::milliseconds(1);
    now.max(floor)
}
