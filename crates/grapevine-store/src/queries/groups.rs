// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group chats, memberships, per-user monitor settings and captured mentions.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use grapevine_core::GrapevineError;
use grapevine_core::time::{parse_db_timestamp, to_db_timestamp};
use grapevine_core::types::Urgency;

use crate::database::{Database, map_tr_err};
use crate::models::{ChatGroup, GroupMention, GroupSettings};

/// Fetch or create a group by chat id, refreshing the title.
pub async fn upsert_group(
    db: &Database,
    chat_id: i64,
    title: &str,
) -> Result<ChatGroup, GrapevineError> {
    let title = title.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO chat_groups (chat_id, title) VALUES (?1, ?2)
                 ON CONFLICT(chat_id) DO UPDATE SET title = excluded.title",
                params![chat_id, title],
            )?;
            let group = conn.query_row(
                "SELECT id, chat_id, title FROM chat_groups WHERE chat_id = ?1",
                params![chat_id],
                |row| {
                    Ok(ChatGroup {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        title: row.get(2)?,
                    })
                },
            )?;
            Ok(group)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a user as a member of a group (monitored by default).
pub async fn ensure_membership(
    db: &Database,
    user_id: i64,
    group_id: i64,
) -> Result<(), GrapevineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO group_memberships (user_id, group_id) VALUES (?1, ?2)
                 ON CONFLICT(user_id, group_id) DO NOTHING",
                params![user_id, group_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The groups a user monitors.
pub async fn monitored_for_user(
    db: &Database,
    user_id: i64,
) -> Result<Vec<ChatGroup>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.chat_id, g.title FROM chat_groups g
                 JOIN group_memberships m ON m.group_id = g.id
                 WHERE m.user_id = ?1 AND m.monitored = 1 ORDER BY g.id",
            )?;
            let groups = stmt
                .query_map(params![user_id], |row| {
                    Ok(ChatGroup {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        title: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(groups)
        })
        .await
        .map_err(map_tr_err)
}

/// Per-user monitor settings, defaulted when unset.
pub async fn settings_or_default(
    db: &Database,
    user_id: i64,
) -> Result<GroupSettings, GrapevineError> {
    let found = db
        .connection()
        .call(move |conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, mentions_enabled, context_window
                     FROM group_settings WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(GroupSettings {
                            user_id: row.get(0)?,
                            mentions_enabled: row.get::<_, i64>(1)? != 0,
                            context_window: row.get::<_, i64>(2)? as usize,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
        .map_err(map_tr_err)?;
    Ok(found.unwrap_or(GroupSettings {
        user_id,
        mentions_enabled: true,
        context_window: 5,
    }))
}

/// Replace the user's monitor settings.
pub async fn set_settings(db: &Database, settings: &GroupSettings) -> Result<(), GrapevineError> {
    let s = settings.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO group_settings (user_id, mentions_enabled, context_window)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     mentions_enabled = excluded.mentions_enabled,
                     context_window = excluded.context_window",
                params![s.user_id, s.mentions_enabled as i64, s.context_window as i64],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_mention(row: &rusqlite::Row) -> rusqlite::Result<GroupMention> {
    let urgency: String = row.get(6)?;
    let captured_at: String = row.get(8)?;
    Ok(GroupMention {
        id: row.get(0)?,
        user_id: row.get(1)?,
        group_id: row.get(2)?,
        message_id: row.get(3)?,
        context: row.get(4)?,
        reason: row.get(5)?,
        urgency: urgency.parse().unwrap_or(Urgency::Low),
        notified: row.get::<_, i64>(7)? != 0,
        captured_at: parse_db_timestamp(&captured_at),
    })
}

/// Persist a captured mention; returns the row id.
pub async fn insert_mention(
    db: &Database,
    user_id: i64,
    group_id: i64,
    message_id: i64,
    context: &str,
    reason: Option<&str>,
    urgency: Urgency,
    captured_at: DateTime<Utc>,
) -> Result<i64, GrapevineError> {
    let context = context.to_string();
    let reason = reason.map(str::to_string);
    let urgency = urgency.to_string();
    let ts = to_db_timestamp(captured_at);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO group_mentions
                     (user_id, group_id, message_id, context, reason, urgency, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![user_id, group_id, message_id, context, reason, urgency, ts],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Flip a mention's `notified` flag after delivery.
pub async fn mark_notified(db: &Database, mention_id: i64) -> Result<(), GrapevineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE group_mentions SET notified = 1 WHERE id = ?1",
                params![mention_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// A user's captured mentions, newest first.
pub async fn recent_mentions(
    db: &Database,
    user_id: i64,
    limit: usize,
) -> Result<Vec<GroupMention>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, group_id, message_id, context, reason, urgency, notified, \
                     captured_at
                 FROM group_mentions WHERE user_id = ?1
                 ORDER BY captured_at DESC, id DESC LIMIT ?2",
            )?;
            let mentions = stmt
                .query_map(params![user_id, limit as i64], row_to_mention)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(mentions)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users;

    async fn fixture() -> (Database, i64, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let user = users::upsert(&db, 1, None, None).await.unwrap();
        let group = upsert_group(&db, -100987, "Rust Chat").await.unwrap();
        ensure_membership(&db, user.id, group.id).await.unwrap();
        (db, user.id, group.id)
    }

    #[tokio::test]
    async fn group_upsert_refreshes_title() {
        let (db, _, group_id) = fixture().await;
        let group = upsert_group(&db, -100987, "Rust Chat v2").await.unwrap();
        assert_eq!(group.id, group_id);
        assert_eq!(group.title, "Rust Chat v2");
    }

    #[tokio::test]
    async fn monitored_groups_listed() {
        let (db, user_id, group_id) = fixture().await;
        let groups = monitored_for_user(&db, user_id).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, group_id);
    }

    #[tokio::test]
    async fn settings_default_then_override() {
        let (db, user_id, _) = fixture().await;
        let settings = settings_or_default(&db, user_id).await.unwrap();
        assert!(settings.mentions_enabled);
        assert_eq!(settings.context_window, 5);

        set_settings(
            &db,
            &GroupSettings {
                user_id,
                mentions_enabled: false,
                context_window: 10,
            },
        )
        .await
        .unwrap();
        let settings = settings_or_default(&db, user_id).await.unwrap();
        assert!(!settings.mentions_enabled);
        assert_eq!(settings.context_window, 10);
    }

    #[tokio::test]
    async fn mention_lifecycle() {
        let (db, user_id, group_id) = fixture().await;
        let id = insert_mention(
            &db,
            user_id,
            group_id,
            555,
            "…@alice can you look at the deploy?…",
            Some("direct question"),
            Urgency::High,
            Utc::now(),
        )
        .await
        .unwrap();

        let mentions = recent_mentions(&db, user_id, 10).await.unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].urgency, Urgency::High);
        assert!(!mentions[0].notified);

        mark_notified(&db, id).await.unwrap();
        let mentions = recent_mentions(&db, user_id, 10).await.unwrap();
        assert!(mentions[0].notified);
    }
}
