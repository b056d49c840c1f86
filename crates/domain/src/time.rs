//! Timestamp handling at the ingest boundary.

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp, substituting the current wall time (with a
/// warning) when the input does not parse. Applied to every timestamp that
/// crosses the ingest boundary.
pub fn parse_or_now(raw: &str, context: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!(
                raw,
                context,
                error = %e,
                "unparseable timestamp, substituting current time"
            );
            Utc::now()
        }
    }
}

/// RFC 3339 with millisecond precision, the wire form for all timestamps.
pub fn to_rfc3339_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
