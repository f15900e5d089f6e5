// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user digest settings.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use grapevine_core::GrapevineError;
use grapevine_core::time::to_db_timestamp;
use grapevine_core::types::{DigestFrequency, RenderFormat};

use crate::database::{Database, map_tr_err};
use crate::models::DigestSettings;
use crate::queries::{json_strings, opt_ts};

const DIGEST_COLUMNS: &str = "user_id, enabled, frequency, send_time, timezone, channels, topics, \
     max_posts, format, ai_summarize, preferred_topics, summary_style, last_sent_at, \
     next_scheduled_at";

fn row_to_settings(row: &rusqlite::Row) -> rusqlite::Result<DigestSettings> {
    let frequency: String = row.get(2)?;
    let format: String = row.get(8)?;
    let channels_raw: Option<String> = row.get(5)?;
    Ok(DigestSettings {
        user_id: row.get(0)?,
        enabled: row.get::<_, i64>(1)? != 0,
        frequency: frequency.parse().unwrap_or(DigestFrequency::Daily),
        send_time: row.get(3)?,
        timezone: row.get(4)?,
        channels: channels_raw.and_then(|s| serde_json::from_str(&s).ok()),
        topics: json_strings(row.get(6)?),
        max_posts: row.get::<_, i64>(7)? as usize,
        format: format.parse().unwrap_or(RenderFormat::Markdown),
        ai_summarize: row.get::<_, i64>(9)? != 0,
        preferred_topics: json_strings(row.get(10)?).unwrap_or_default(),
        summary_style: row.get(11)?,
        last_sent_at: opt_ts(row.get(12)?),
        next_scheduled_at: opt_ts(row.get(13)?),
    })
}

/// Insert or replace a user's digest settings.
pub async fn upsert(db: &Database, settings: &DigestSettings) -> Result<(), GrapevineError> {
    let s = settings.clone();
    let channels = s
        .channels
        .as_ref()
        .map(|c| serde_json::to_string(c))
        .transpose()
        .map_err(GrapevineError::storage)?;
    let topics = s
        .topics
        .as_ref()
        .map(|t| serde_json::to_string(t))
        .transpose()
        .map_err(GrapevineError::storage)?;
    let preferred =
        serde_json::to_string(&s.preferred_topics).map_err(GrapevineError::storage)?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO digest_settings
                     (user_id, enabled, frequency, send_time, timezone, channels, topics,
                      max_posts, format, ai_summarize, preferred_topics, summary_style,
                      last_sent_at, next_scheduled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(user_id) DO UPDATE SET
                     enabled = excluded.enabled,
                     frequency = excluded.frequency,
                     send_time = excluded.send_time,
                     timezone = excluded.timezone,
                     channels = excluded.channels,
                     topics = excluded.topics,
                     max_posts = excluded.max_posts,
                     format = excluded.format,
                     ai_summarize = excluded.ai_summarize,
                     preferred_topics = excluded.preferred_topics,
                     summary_style = excluded.summary_style",
                params![
                    s.user_id,
                    s.enabled as i64,
                    s.frequency.to_string(),
                    s.send_time,
                    s.timezone,
                    channels,
                    topics,
                    s.max_posts as i64,
                    s.format.to_string(),
                    s.ai_summarize as i64,
                    preferred,
                    s.summary_style,
                    s.last_sent_at.map(to_db_timestamp),
                    s.next_scheduled_at.map(to_db_timestamp),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// A user's digest settings, falling back to defaults when unset.
pub async fn get_or_default(db: &Database, user_id: i64) -> Result<DigestSettings, GrapevineError> {
    let found = db
        .connection()
        .call(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {DIGEST_COLUMNS} FROM digest_settings WHERE user_id = ?1"),
                    params![user_id],
                    row_to_settings,
                )
                .optional()?;
            Ok(row)
        })
        .await
        .map_err(map_tr_err)?;
    Ok(found.unwrap_or_else(|| DigestSettings::defaults(user_id)))
}

/// Settings rows with digests enabled (the scheduler's population).
pub async fn list_enabled(db: &Database) -> Result<Vec<DigestSettings>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DIGEST_COLUMNS} FROM digest_settings WHERE enabled = 1 ORDER BY user_id"
            ))?;
            let rows = stmt
                .query_map([], row_to_settings)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

/// Set the next scheduled slot without touching `last_sent_at`.
pub async fn set_next_scheduled(
    db: &Database,
    user_id: i64,
    next: DateTime<Utc>,
) -> Result<(), GrapevineError> {
    let next_s = to_db_timestamp(next);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE digest_settings SET next_scheduled_at = ?1 WHERE user_id = ?2",
                params![next_s, user_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a successful delivery and the next scheduled slot.
pub async fn mark_sent(
    db: &Database,
    user_id: i64,
    sent_at: DateTime<Utc>,
    next: Option<DateTime<Utc>>,
) -> Result<(), GrapevineError> {
    let sent_s = to_db_timestamp(sent_at);
    let next_s = next.map(to_db_timestamp);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE digest_settings SET last_sent_at = ?1, next_scheduled_at = ?2
                 WHERE user_id = ?3",
                params![sent_s, next_s, user_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
