use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

/// Current time, overridable with `TRIAGE_FIXED_TIME` (RFC 3339) for reproducible runs.
pub fn now_utc() -> DateTime<Utc> {
    if let Ok(value) = std::env::var("TRIAGE_FIXED_TIME") {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
            return dt.with_timezone(&Utc);
        }
    }
    Utc::now()
}

/// Parse an ISO-8601 timestamp. Offset-less values are read as UTC and keep
/// their written wall-clock time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt);
    }
    let utc = FixedOffset::east_opt(0)?;
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return utc.from_local_datetime(&naive).single();
        }
    }
    None
}
