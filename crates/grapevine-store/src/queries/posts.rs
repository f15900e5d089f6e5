// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post persistence: batch ingestion, tagging state, windows, retention.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use grapevine_core::GrapevineError;
use grapevine_core::time::{parse_db_timestamp, to_db_timestamp};
use grapevine_core::types::TaggingStatus;

use crate::database::{Database, map_tr_err};
use crate::models::{NewPost, Post};
use crate::queries::json_strings;

const POST_COLUMNS: &str = "id, user_id, channel_id, telegram_message_id, text, views, url, \
     posted_at, tags, tagging_status, tagging_attempts, enriched_content";

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    let posted_at: String = row.get(7)?;
    let status: String = row.get(9)?;
    Ok(Post {
        id: row.get(0)?,
        user_id: row.get(1)?,
        channel_id: row.get(2)?,
        telegram_message_id: row.get(3)?,
        text: row.get(4)?,
        views: row.get(5)?,
        url: row.get(6)?,
        posted_at: parse_db_timestamp(&posted_at),
        tags: json_strings(row.get(8)?),
        tagging_status: status.parse().unwrap_or(TaggingStatus::Pending),
        tagging_attempts: row.get(10)?,
        enriched_content: row.get(11)?,
    })
}

/// Normalize and validate a tag list: trimmed, lowercased, non-empty,
/// deduplicated, at most 10 labels.
pub fn normalize_tags(raw: &[String]) -> Result<Vec<String>, GrapevineError> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    if tags.is_empty() {
        return Err(GrapevineError::Validation(
            "tag list empty after normalization".into(),
        ));
    }
    tags.truncate(10);
    Ok(tags)
}

/// Insert a batch of freshly parsed posts in one transaction.
///
/// Duplicates on `(user_id, channel_id, telegram_message_id)` are silently
/// skipped; only ids of rows actually inserted are returned, so a repeated
/// parse yields an empty batch.
pub async fn insert_batch(
    db: &Database,
    user_id: i64,
    channel_id: i64,
    posts: Vec<NewPost>,
) -> Result<Vec<i64>, GrapevineError> {
    if posts.is_empty() {
        return Ok(Vec::new());
    }
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO posts
                         (user_id, channel_id, telegram_message_id, text, views, url, posted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for post in &posts {
                    let changed = stmt.execute(params![
                        user_id,
                        channel_id,
                        post.telegram_message_id,
                        post.text,
                        post.views,
                        post.url,
                        to_db_timestamp(post.posted_at),
                    ])?;
                    if changed > 0 {
                        inserted.push(tx.last_insert_rowid());
                    }
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch one post.
pub async fn get(db: &Database, post_id: i64) -> Result<Option<Post>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let post = conn
                .query_row(
                    &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                    params![post_id],
                    row_to_post,
                )
                .optional()?;
            Ok(post)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch several posts by id, in id order.
pub async fn get_many(db: &Database, ids: Vec<i64>) -> Result<Vec<Post>, GrapevineError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    db.connection()
        .call(move |conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE id IN ({}) ORDER BY id",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let params_vec: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            let posts = stmt
                .query_map(params_vec.as_slice(), row_to_post)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(posts)
        })
        .await
        .map_err(map_tr_err)
}

/// Store validated tags and flip the post to `success`.
pub async fn set_tags(db: &Database, post_id: i64, raw: &[String]) -> Result<(), GrapevineError> {
    let tags = normalize_tags(raw)?;
    let json = serde_json::to_string(&tags).map_err(GrapevineError::storage)?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE posts SET tags = ?1, tagging_status = 'success' WHERE id = ?2",
                params![json, post_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failed tagging attempt: bump the counter and set the status
/// (`retrying` below the cap, `failed` at it).
pub async fn record_tagging_failure(
    db: &Database,
    post_id: i64,
    max_attempts: u32,
) -> Result<TaggingStatus, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE posts SET tagging_attempts = tagging_attempts + 1 WHERE id = ?1",
                params![post_id],
            )?;
            let attempts: u32 = tx.query_row(
                "SELECT tagging_attempts FROM posts WHERE id = ?1",
                params![post_id],
                |row| row.get(0),
            )?;
            let status = if attempts >= max_attempts {
                TaggingStatus::Failed
            } else {
                TaggingStatus::Retrying
            };
            tx.execute(
                "UPDATE posts SET tagging_status = ?1 WHERE id = ?2",
                params![status.to_string(), post_id],
            )?;
            tx.commit()?;
            Ok(status)
        })
        .await
        .map_err(map_tr_err)
}

/// Posts awaiting tagging (`pending` or `retrying`), oldest first.
pub async fn pending_tagging(db: &Database, limit: usize) -> Result<Vec<Post>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE tagging_status IN ('pending', 'retrying')
                 ORDER BY id LIMIT ?1"
            ))?;
            let posts = stmt
                .query_map(params![limit as i64], row_to_post)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(posts)
        })
        .await
        .map_err(map_tr_err)
}

/// Posts that have no indexing status row yet, oldest first.
pub async fn unindexed(db: &Database, limit: usize) -> Result<Vec<Post>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts p
                 WHERE NOT EXISTS (
                     SELECT 1 FROM indexing_status s
                     WHERE s.post_id = p.id AND s.user_id = p.user_id)
                 ORDER BY p.id LIMIT ?1"
            ))?;
            let posts = stmt
                .query_map(params![limit as i64], row_to_post)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(posts)
        })
        .await
        .map_err(map_tr_err)
}

/// All post ids owned by a user, oldest first.
pub async fn ids_for_user(db: &Database, user_id: i64) -> Result<Vec<i64>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM posts WHERE user_id = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(map_tr_err)
}

/// Highest ingested Telegram message id for a (user, channel); 0 when the
/// channel has never been parsed. The parser fetches strictly above this.
pub async fn last_message_id(
    db: &Database,
    user_id: i64,
    channel_id: i64,
) -> Result<i64, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let max: Option<i64> = conn.query_row(
                "SELECT max(telegram_message_id) FROM posts
                 WHERE user_id = ?1 AND channel_id = ?2",
                params![user_id, channel_id],
                |row| row.get(0),
            )?;
            Ok(max.unwrap_or(0))
        })
        .await
        .map_err(map_tr_err)
}

/// Posts inside a `[from, to]` window, optionally restricted to channels,
/// newest first. Tag filters are applied by the caller (tags live in JSON).
pub async fn in_window(
    db: &Database,
    user_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    channels: Option<Vec<i64>>,
    limit: usize,
) -> Result<Vec<Post>, GrapevineError> {
    let from_s = to_db_timestamp(from);
    let to_s = to_db_timestamp(to);
    db.connection()
        .call(move |conn| {
            let mut sql = format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE user_id = ?1 AND posted_at >= ?2 AND posted_at <= ?3"
            );
            if let Some(channels) = &channels {
                if !channels.is_empty() {
                    let list = channels
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!(" AND channel_id IN ({list})"));
                }
            }
            sql.push_str(" ORDER BY posted_at DESC LIMIT ?4");
            let mut stmt = conn.prepare(&sql)?;
            let posts = stmt
                .query_map(params![user_id, from_s, to_s, limit as i64], row_to_post)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(posts)
        })
        .await
        .map_err(map_tr_err)
}

/// Posts newer than `since`, newest first (gateway listing).
pub async fn recent(
    db: &Database,
    user_id: i64,
    since: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<Post>, GrapevineError> {
    let since_s = to_db_timestamp(since);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts
                 WHERE user_id = ?1 AND posted_at >= ?2
                 ORDER BY posted_at DESC LIMIT ?3"
            ))?;
            let posts = stmt
                .query_map(params![user_id, since_s, limit as i64], row_to_post)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(posts)
        })
        .await
        .map_err(map_tr_err)
}

/// Ids of posts older than the retention cutoff.
pub async fn older_than(
    db: &Database,
    user_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<Vec<i64>, GrapevineError> {
    let cutoff_s = to_db_timestamp(cutoff);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM posts WHERE user_id = ?1 AND posted_at < ?2 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(params![user_id, cutoff_s], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete posts by id. Indexing status rows cascade.
pub async fn delete_many(db: &Database, ids: Vec<i64>) -> Result<usize, GrapevineError> {
    if ids.is_empty() {
        return Ok(0);
    }
    db.connection()
        .call(move |conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!("DELETE FROM posts WHERE id IN ({})", placeholders.join(", "));
            let params_vec: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            let n = conn.execute(&sql, params_vec.as_slice())?;
            Ok(n)
        })
        .await
        .map_err(map_tr_err)
}

/// Post count for a user (ingestion quota checks).
pub async fn count_for_user(db: &Database, user_id: i64) -> Result<usize, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT count(*) FROM posts WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
        .map_err(map_tr_err)
}

/// Attach crawled link markdown to a post.
pub async fn set_enriched_content(
    db: &Database,
    post_id: i64,
    markdown: &str,
) -> Result<(), GrapevineError> {
    let markdown = markdown.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE posts SET enriched_content = ?1 WHERE id = ?2",
                params![markdown, post_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
