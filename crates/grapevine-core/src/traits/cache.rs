// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TTL key/value cache trait.
//!
//! The cache is multi-writer (the auth and bot processes share it) and
//! tolerates stale reads; TTLs are the source of truth.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::GrapevineError;

/// A TTL key/value cache storing JSON values.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value; `None` when absent or expired.
    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, GrapevineError>;

    /// Store a value with a TTL.
    async fn set_json(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), GrapevineError>;

    /// Delete a key; true when a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, GrapevineError>;
}

/// Cache key for a transient QR login session (TTL 600s).
pub fn qr_session_key(session_id: &str) -> String {
    format!("qr_session:{session_id}")
}

/// Cache key for a user's interest rollup (TTL 3600s).
pub fn interests_key(telegram_id: i64) -> String {
    format!("graph:interests:{telegram_id}")
}

/// Cache key for the trending-tags rollup over `days` (TTL 21600s).
pub fn trending_key(days: u32) -> String {
    format!("graph:trending:tags:d{days}")
}

/// Cache key for a post's graph context (TTL 86400s).
pub fn post_context_key(post_id: i64) -> String {
    format!("graph:post_context:{post_id}")
}
