// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per entity family.

pub mod channels;
pub mod collections;
pub mod digests;
pub mod groups;
pub mod history;
pub mod indexing;
pub mod invites;
pub mod posts;
pub mod users;

use chrono::{DateTime, Utc};
use grapevine_core::time::parse_db_timestamp;

/// Parse an optional timestamp column.
pub(crate) fn opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(|s| parse_db_timestamp(&s))
}

/// Parse a JSON-array column into a string vector.
pub(crate) fn json_strings(raw: Option<String>) -> Option<Vec<String>> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}
