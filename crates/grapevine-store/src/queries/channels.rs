// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channels and the user↔channel subscription association.
//!
//! Channels are shared across users and identified by username; the
//! canonical telegram id and title are filled in on first resolution.
//! Removing the last subscriber deletes the channel, cascading its posts.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use grapevine_core::GrapevineError;
use grapevine_core::time::to_db_timestamp;

use crate::database::{Database, map_tr_err};
use crate::models::{Channel, Subscription};
use crate::queries::opt_ts;

fn row_to_channel(row: &rusqlite::Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        channel_username: row.get(1)?,
        telegram_channel_id: row.get(2)?,
        title: row.get(3)?,
    })
}

/// Normalize a channel username: strip a leading `@`, lowercase.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

/// Fetch or create a channel by username (upsert on `channel_username`).
pub async fn get_or_create(db: &Database, username: &str) -> Result<Channel, GrapevineError> {
    let username = normalize_username(username);
    if username.is_empty() {
        return Err(GrapevineError::Validation("empty channel username".into()));
    }
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO channels (channel_username) VALUES (?1)
                 ON CONFLICT(channel_username) DO NOTHING",
                params![username],
            )?;
            let channel = conn.query_row(
                "SELECT id, channel_username, telegram_channel_id, title
                 FROM channels WHERE channel_username = ?1",
                params![username],
                row_to_channel,
            )?;
            Ok(channel)
        })
        .await
        .map_err(map_tr_err)
}

/// Record the resolved entity id and title, once known.
pub async fn set_entity(
    db: &Database,
    channel_id: i64,
    telegram_channel_id: i64,
    title: &str,
) -> Result<(), GrapevineError> {
    let title = title.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE channels SET telegram_channel_id = ?1, title = ?2 WHERE id = ?3",
                params![telegram_channel_id, title, channel_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a channel by row id.
pub async fn get_by_id(db: &Database, id: i64) -> Result<Option<Channel>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let channel = conn
                .query_row(
                    "SELECT id, channel_username, telegram_channel_id, title
                     FROM channels WHERE id = ?1",
                    params![id],
                    row_to_channel,
                )
                .optional()?;
            Ok(channel)
        })
        .await
        .map_err(map_tr_err)
}

/// Subscribe a user to a channel, reactivating a previously deactivated
/// subscription in place.
pub async fn subscribe(db: &Database, user_id: i64, channel_id: i64) -> Result<(), GrapevineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO user_channels (user_id, channel_id, active) VALUES (?1, ?2, 1)
                 ON CONFLICT(user_id, channel_id) DO UPDATE SET active = 1",
                params![user_id, channel_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Deactivate a subscription without removing it. The cursor freezes; the
/// user's posts stay.
pub async fn deactivate(
    db: &Database,
    user_id: i64,
    channel_id: i64,
) -> Result<(), GrapevineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE user_channels SET active = 0 WHERE user_id = ?1 AND channel_id = ?2",
                params![user_id, channel_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Remove a subscription entirely. When the last subscriber goes, the
/// channel is deleted and its posts cascade. Returns whether the channel
/// was removed.
pub async fn unsubscribe(
    db: &Database,
    user_id: i64,
    channel_id: i64,
) -> Result<bool, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM user_channels WHERE user_id = ?1 AND channel_id = ?2",
                params![user_id, channel_id],
            )?;
            let remaining: i64 = tx.query_row(
                "SELECT count(*) FROM user_channels WHERE channel_id = ?1",
                params![channel_id],
                |row| row.get(0),
            )?;
            let mut channel_deleted = false;
            if remaining == 0 {
                tx.execute("DELETE FROM channels WHERE id = ?1", params![channel_id])?;
                channel_deleted = true;
            }
            tx.commit()?;
            Ok(channel_deleted)
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_pair(row: &rusqlite::Row) -> rusqlite::Result<(Subscription, Channel)> {
    let created_at: String = row.get(2)?;
    Ok((
        Subscription {
            user_id: row.get(0)?,
            channel_id: row.get(1)?,
            created_at: grapevine_core::time::parse_db_timestamp(&created_at),
            last_parsed_at: opt_ts(row.get(3)?),
            active: row.get::<_, i64>(4)? != 0,
        },
        Channel {
            id: row.get(5)?,
            channel_username: row.get(6)?,
            telegram_channel_id: row.get(7)?,
            title: row.get(8)?,
        },
    ))
}

const PAIR_SQL: &str = "SELECT uc.user_id, uc.channel_id, uc.created_at, uc.last_parsed_at, \
     uc.active, c.id, c.channel_username, c.telegram_channel_id, c.title \
     FROM user_channels uc JOIN channels c ON c.id = uc.channel_id";

/// A user's active subscriptions joined with their channels.
pub async fn active_subscriptions(
    db: &Database,
    user_id: i64,
) -> Result<Vec<(Subscription, Channel)>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{PAIR_SQL} WHERE uc.user_id = ?1 AND uc.active = 1 ORDER BY uc.created_at"
            ))?;
            let pairs = stmt
                .query_map(params![user_id], row_to_pair)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(pairs)
        })
        .await
        .map_err(map_tr_err)
}

/// All of a user's subscriptions, active or not.
pub async fn all_subscriptions(
    db: &Database,
    user_id: i64,
) -> Result<Vec<(Subscription, Channel)>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{PAIR_SQL} WHERE uc.user_id = ?1 ORDER BY uc.created_at"
            ))?;
            let pairs = stmt
                .query_map(params![user_id], row_to_pair)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(pairs)
        })
        .await
        .map_err(map_tr_err)
}

/// Count a user's active subscriptions (`max_channels` enforcement).
pub async fn count_active(db: &Database, user_id: i64) -> Result<usize, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT count(*) FROM user_channels WHERE user_id = ?1 AND active = 1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
        .map_err(map_tr_err)
}

/// Advance the per-subscription parse watermark. Called only after the
/// channel's batch has been committed.
pub async fn advance_cursor(
    db: &Database,
    user_id: i64,
    channel_id: i64,
    parsed_at: DateTime<Utc>,
) -> Result<(), GrapevineError> {
    let ts = to_db_timestamp(parsed_at);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE user_channels SET last_parsed_at = ?1
                 WHERE user_id = ?2 AND channel_id = ?3",
                params![ts, user_id, channel_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Channels with zero subscriptions, eligible for reaping.
pub async fn orphaned(db: &Database) -> Result<Vec<i64>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id FROM channels c
                 LEFT JOIN user_channels uc ON uc.channel_id = c.id
                 WHERE uc.channel_id IS NULL",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete channels by id, cascading their posts.
pub async fn delete_many(db: &Database, ids: Vec<i64>) -> Result<usize, GrapevineError> {
    if ids.is_empty() {
        return Ok(0);
    }
    db.connection()
        .call(move |conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "DELETE FROM channels WHERE id IN ({})",
                placeholders.join(", ")
            );
            let params_vec: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            let n = conn.execute(&sql, params_vec.as_slice())?;
            Ok(n)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users;

    async fn db_with_user() -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let user = users::upsert(&db, 20000001, None, None).await.unwrap();
        (db, user.id)
    }

    #[tokio::test]
    async fn get_or_create_normalizes_and_upserts() {
        let (db, _) = db_with_user().await;
        let a = get_or_create(&db, "@AI_News").await.unwrap();
        let b = get_or_create(&db, "ai_news").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.channel_username, "ai_news");
        assert!(a.telegram_channel_id.is_none());
    }

    #[tokio::test]
    async fn empty_username_is_validation_error() {
        let (db, _) = db_with_user().await;
        assert!(matches!(
            get_or_create(&db, "@").await,
            Err(GrapevineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn entity_resolution_fills_id_and_title() {
        let (db, _) = db_with_user().await;
        let channel = get_or_create(&db, "ai_news").await.unwrap();
        set_entity(&db, channel.id, -1001234, "AI News").await.unwrap();
        let channel = get_by_id(&db, channel.id).await.unwrap().unwrap();
        assert_eq!(channel.telegram_channel_id, Some(-1001234));
        assert_eq!(channel.title.as_deref(), Some("AI News"));
    }

    #[tokio::test]
    async fn subscribe_deactivate_reactivate() {
        let (db, user_id) = db_with_user().await;
        let channel = get_or_create(&db, "ai_news").await.unwrap();

        subscribe(&db, user_id, channel.id).await.unwrap();
        assert_eq!(count_active(&db, user_id).await.unwrap(), 1);

        deactivate(&db, user_id, channel.id).await.unwrap();
        assert_eq!(count_active(&db, user_id).await.unwrap(), 0);
        assert_eq!(all_subscriptions(&db, user_id).await.unwrap().len(), 1);

        subscribe(&db, user_id, channel.id).await.unwrap();
        assert_eq!(count_active(&db, user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn last_unsubscribe_deletes_channel() {
        let (db, user_id) = db_with_user().await;
        let other = users::upsert(&db, 20000002, None, None).await.unwrap();
        let channel = get_or_create(&db, "ai_news").await.unwrap();
        subscribe(&db, user_id, channel.id).await.unwrap();
        subscribe(&db, other.id, channel.id).await.unwrap();

        let deleted = unsubscribe(&db, user_id, channel.id).await.unwrap();
        assert!(!deleted, "another subscriber remains");

        let deleted = unsubscribe(&db, other.id, channel.id).await.unwrap();
        assert!(deleted, "last subscriber removes the channel");
        assert!(get_by_id(&db, channel.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cursor_advances() {
        let (db, user_id) = db_with_user().await;
        let channel = get_or_create(&db, "ai_news").await.unwrap();
        subscribe(&db, user_id, channel.id).await.unwrap();

        let subs = active_subscriptions(&db, user_id).await.unwrap();
        assert!(subs[0].0.last_parsed_at.is_none());

        let now = Utc::now();
        advance_cursor(&db, user_id, channel.id, now).await.unwrap();
        let subs = active_subscriptions(&db, user_id).await.unwrap();
        let cursor = subs[0].0.last_parsed_at.unwrap();
        assert!((cursor - now).num_seconds().abs() <= 1);
    }

    #[tokio::test]
    async fn orphan_detection_and_reaping() {
        let (db, user_id) = db_with_user().await;
        let kept = get_or_create(&db, "kept").await.unwrap();
        let orphan = get_or_create(&db, "orphan").await.unwrap();
        subscribe(&db, user_id, kept.id).await.unwrap();

        let orphans = orphaned(&db).await.unwrap();
        assert_eq!(orphans, vec![orphan.id]);

        assert_eq!(delete_many(&db, orphans).await.unwrap(), 1);
        assert!(get_by_id(&db, orphan.id).await.unwrap().is_none());
        assert!(get_by_id(&db, kept.id).await.unwrap().is_some());
    }
}
