// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned schema, tracked through `PRAGMA user_version`.

use tokio_rusqlite::Connection;

use grapevine_core::GrapevineError;

use crate::database::map_tr_err;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id INTEGER NOT NULL UNIQUE,
    username TEXT,
    first_name TEXT,
    api_id_enc TEXT,
    api_hash_enc TEXT,
    phone_enc TEXT,
    auth_status TEXT NOT NULL DEFAULT 'pending',
    tier TEXT NOT NULL DEFAULT 'free',
    subscription_expires TEXT,
    retention_days INTEGER NOT NULL DEFAULT 30,
    role TEXT NOT NULL DEFAULT 'user',
    failed_auth_attempts INTEGER NOT NULL DEFAULT 0,
    last_auth_attempt TEXT,
    block_expires TEXT,
    feature_flags TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_username TEXT NOT NULL UNIQUE,
    telegram_channel_id INTEGER,
    title TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS user_channels (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    last_parsed_at TEXT,
    PRIMARY KEY (user_id, channel_id)
);

CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    telegram_message_id INTEGER NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    views INTEGER,
    url TEXT,
    posted_at TEXT NOT NULL,
    tags TEXT,
    tagging_status TEXT NOT NULL DEFAULT 'pending',
    tagging_attempts INTEGER NOT NULL DEFAULT 0,
    enriched_content TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (user_id, channel_id, telegram_message_id)
);
CREATE INDEX IF NOT EXISTS idx_posts_user_posted ON posts(user_id, posted_at);
CREATE INDEX IF NOT EXISTS idx_posts_tagging ON posts(tagging_status);

CREATE TABLE IF NOT EXISTS indexing_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
    vector_id TEXT,
    status TEXT NOT NULL,
    error TEXT,
    indexed_at TEXT NOT NULL,
    UNIQUE (user_id, post_id)
);

CREATE TABLE IF NOT EXISTS vector_collections (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    vector_size INTEGER NOT NULL,
    provider_signature TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invite_codes (
    code TEXT PRIMARY KEY,
    expires_at TEXT NOT NULL,
    max_uses INTEGER NOT NULL DEFAULT 1,
    uses_count INTEGER NOT NULL DEFAULT 0,
    default_tier TEXT NOT NULL DEFAULT 'trial',
    default_trial_days INTEGER,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS digest_settings (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    enabled INTEGER NOT NULL DEFAULT 0,
    frequency TEXT NOT NULL DEFAULT 'daily',
    send_time TEXT NOT NULL DEFAULT '09:00',
    timezone TEXT NOT NULL DEFAULT 'UTC',
    channels TEXT,
    topics TEXT,
    max_posts INTEGER NOT NULL DEFAULT 20,
    format TEXT NOT NULL DEFAULT 'markdown',
    ai_summarize INTEGER NOT NULL DEFAULT 0,
    preferred_topics TEXT,
    summary_style TEXT NOT NULL DEFAULT 'concise',
    last_sent_at TEXT,
    next_scheduled_at TEXT
);

CREATE TABLE IF NOT EXISTS rag_query_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    query TEXT NOT NULL,
    asked_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_user ON rag_query_history(user_id, asked_at);

CREATE TABLE IF NOT EXISTS chat_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS group_memberships (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    group_id INTEGER NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
    monitored INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS group_settings (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    mentions_enabled INTEGER NOT NULL DEFAULT 1,
    context_window INTEGER NOT NULL DEFAULT 5
);

CREATE TABLE IF NOT EXISTS group_mentions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    group_id INTEGER NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
    message_id INTEGER NOT NULL,
    context TEXT NOT NULL,
    reason TEXT,
    urgency TEXT NOT NULL DEFAULT 'low',
    notified INTEGER NOT NULL DEFAULT 0,
    captured_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mentions_user ON group_mentions(user_id, captured_at);
";

/// Apply any pending migrations. Idempotent.
pub async fn apply(conn: &Connection) -> Result<(), GrapevineError> {
    conn.call(|conn| {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < 1 {
            conn.execute_batch(SCHEMA_V1)?;
            conn.pragma_update(None, "user_version", 1)?;
        }
        Ok(())
    })
    .await
    .map_err(map_tr_err)
}
