// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timestamp handling at the storage boundary.
//!
//! All storage is UTC-aware RFC 3339. Naive datetimes encountered at the
//! boundary are coerced to UTC with a warning; presentation layers convert
//! exactly once.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

/// Render a UTC timestamp for storage.
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parse a stored timestamp, coercing naive values to UTC.
///
/// Accepts RFC 3339 and the bare `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS`
/// shapes older rows may carry. Unparseable input falls back to the Unix
/// epoch so a single corrupt row cannot poison a whole scan.
pub fn parse_db_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            warn!(raw, "naive timestamp coerced to UTC");
            return naive.and_utc();
        }
    }
    warn!(raw, "unparseable timestamp, defaulting to epoch");
    DateTime::<Utc>::UNIX_EPOCH
}
