// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User CRUD and authentication state transitions.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, params};

use grapevine_core::GrapevineError;
use grapevine_core::time::{parse_db_timestamp, to_db_timestamp};
use grapevine_core::types::{AuthStatus, SubscriptionTier};

use crate::database::{Database, map_tr_err};
use crate::models::{FeatureFlags, User};
use crate::queries::opt_ts;

const USER_COLUMNS: &str = "id, telegram_id, username, first_name, api_id_enc, api_hash_enc, \
     phone_enc, auth_status, tier, subscription_expires, retention_days, role, \
     failed_auth_attempts, last_auth_attempt, block_expires, feature_flags, created_at";

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let auth_status: String = row.get(7)?;
    let tier: String = row.get(8)?;
    let flags_raw: Option<String> = row.get(15)?;
    let created_at: String = row.get(16)?;
    Ok(User {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        api_id_enc: row.get(4)?,
        api_hash_enc: row.get(5)?,
        phone_enc: row.get(6)?,
        auth_status: auth_status.parse().unwrap_or(AuthStatus::Pending),
        tier: tier.parse().unwrap_or(SubscriptionTier::Free),
        subscription_expires: opt_ts(row.get(9)?),
        retention_days: row.get(10)?,
        role: row.get(11)?,
        failed_auth_attempts: row.get(12)?,
        last_auth_attempt: opt_ts(row.get(13)?),
        block_expires: opt_ts(row.get(14)?),
        feature_flags: flags_raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        created_at: parse_db_timestamp(&created_at),
    })
}

/// Create a user if absent, updating the mutable profile fields otherwise.
pub async fn upsert(
    db: &Database,
    telegram_id: i64,
    username: Option<&str>,
    first_name: Option<&str>,
) -> Result<User, GrapevineError> {
    let username = username.map(str::to_string);
    let first_name = first_name.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO users (telegram_id, username, first_name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(telegram_id) DO UPDATE SET
                     username = COALESCE(excluded.username, users.username),
                     first_name = COALESCE(excluded.first_name, users.first_name)",
                params![telegram_id, username, first_name],
            )?;
            let user = conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
                params![telegram_id],
                row_to_user,
            )?;
            Ok(user)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a user by their Telegram id.
pub async fn get_by_telegram_id(
    db: &Database,
    telegram_id: i64,
) -> Result<Option<User>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
                    params![telegram_id],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch a user by row id.
pub async fn get_by_id(db: &Database, id: i64) -> Result<Option<User>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
        .await
        .map_err(map_tr_err)
}

/// All users, oldest first.
pub async fn list_all(db: &Database) -> Result<Vec<User>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
            let users = stmt
                .query_map([], row_to_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
        .map_err(map_tr_err)
}

/// Users with a live authorized session, the parse-all population.
pub async fn list_authenticated(db: &Database) -> Result<Vec<User>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE auth_status = 'authenticated' ORDER BY id"
            ))?;
            let users = stmt
                .query_map([], row_to_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
        .map_err(map_tr_err)
}

/// Store the vault-encrypted credential bundle.
pub async fn set_credentials(
    db: &Database,
    telegram_id: i64,
    api_id_enc: &str,
    api_hash_enc: &str,
    phone_enc: Option<&str>,
) -> Result<(), GrapevineError> {
    let api_id_enc = api_id_enc.to_string();
    let api_hash_enc = api_hash_enc.to_string();
    let phone_enc = phone_enc.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE users SET api_id_enc = ?1, api_hash_enc = ?2, phone_enc = ?3
                 WHERE telegram_id = ?4",
                params![api_id_enc, api_hash_enc, phone_enc, telegram_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Set the authentication state.
pub async fn set_auth_status(
    db: &Database,
    telegram_id: i64,
    status: AuthStatus,
) -> Result<(), GrapevineError> {
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE users SET auth_status = ?1 WHERE telegram_id = ?2",
                params![status, telegram_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record a failed authorization attempt. Past `threshold` failures the
/// user is blocked for `cooldown`. Returns the new attempt count.
pub async fn record_auth_failure(
    db: &Database,
    telegram_id: i64,
    now: DateTime<Utc>,
    threshold: u32,
    cooldown: Duration,
) -> Result<u32, GrapevineError> {
    let now_s = to_db_timestamp(now);
    let block_until = to_db_timestamp(now + cooldown);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE users SET failed_auth_attempts = failed_auth_attempts + 1,
                     last_auth_attempt = ?1
                 WHERE telegram_id = ?2",
                params![now_s, telegram_id],
            )?;
            let attempts: u32 = tx.query_row(
                "SELECT failed_auth_attempts FROM users WHERE telegram_id = ?1",
                params![telegram_id],
                |row| row.get(0),
            )?;
            if attempts >= threshold {
                tx.execute(
                    "UPDATE users SET auth_status = 'blocked', block_expires = ?1
                     WHERE telegram_id = ?2",
                    params![block_until, telegram_id],
                )?;
            }
            tx.commit()?;
            Ok(attempts)
        })
        .await
        .map_err(map_tr_err)
}

/// Clear the failure counter and cooldown after a successful authorization.
pub async fn reset_auth_failures(db: &Database, telegram_id: i64) -> Result<(), GrapevineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE users SET failed_auth_attempts = 0, block_expires = NULL
                 WHERE telegram_id = ?1",
                params![telegram_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Activate a subscription tier, e.g. after invite consumption.
pub async fn activate_tier(
    db: &Database,
    telegram_id: i64,
    tier: SubscriptionTier,
    expires: Option<DateTime<Utc>>,
) -> Result<(), GrapevineError> {
    let tier_s = tier.to_string();
    let retention = tier.default_retention_days();
    let expires_s = expires.map(to_db_timestamp);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE users SET tier = ?1, subscription_expires = ?2, retention_days = ?3
                 WHERE telegram_id = ?4",
                params![tier_s, expires_s, retention, telegram_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Per-user retention override, clamped to 1..=365 days.
pub async fn set_retention_days(
    db: &Database,
    telegram_id: i64,
    days: u32,
) -> Result<(), GrapevineError> {
    if !(1..=365).contains(&days) {
        return Err(GrapevineError::Validation(format!(
            "retention_days {days} outside 1..=365"
        )));
    }
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE users SET retention_days = ?1 WHERE telegram_id = ?2",
                params![days, telegram_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Replace the user's feature flags.
pub async fn set_feature_flags(
    db: &Database,
    telegram_id: i64,
    flags: &FeatureFlags,
) -> Result<(), GrapevineError> {
    let json = serde_json::to_string(flags).map_err(GrapevineError::storage)?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE users SET feature_flags = ?1 WHERE telegram_id = ?2",
                params![json, telegram_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a user and cascade all owned rows.
pub async fn delete(db: &Database, telegram_id: i64) -> Result<bool, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM users WHERE telegram_id = ?1",
                params![telegram_id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_profile() {
        let db = db().await;
        let user = upsert(&db, 20000001, Some("alice"), None).await.unwrap();
        assert_eq!(user.telegram_id, 20000001);
        assert_eq!(user.auth_status, AuthStatus::Pending);
        assert_eq!(user.tier, SubscriptionTier::Free);

        let again = upsert(&db, 20000001, None, Some("Alice")).await.unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(again.username.as_deref(), Some("alice"));
        assert_eq!(again.first_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn auth_failure_blocks_past_threshold() {
        let db = db().await;
        upsert(&db, 1, None, None).await.unwrap();
        let now = Utc::now();

        for attempt in 1..5u32 {
            let n = record_auth_failure(&db, 1, now, 5, Duration::minutes(30))
                .await
                .unwrap();
            assert_eq!(n, attempt);
        }
        let user = get_by_telegram_id(&db, 1).await.unwrap().unwrap();
        assert_eq!(user.auth_status, AuthStatus::Pending);

        record_auth_failure(&db, 1, now, 5, Duration::minutes(30))
            .await
            .unwrap();
        let user = get_by_telegram_id(&db, 1).await.unwrap().unwrap();
        assert_eq!(user.auth_status, AuthStatus::Blocked);
        assert!(user.block_expires.unwrap() > now);

        reset_auth_failures(&db, 1).await.unwrap();
        let user = get_by_telegram_id(&db, 1).await.unwrap().unwrap();
        assert_eq!(user.failed_auth_attempts, 0);
        assert!(user.block_expires.is_none());
    }

    #[tokio::test]
    async fn activate_tier_sets_retention_and_expiry() {
        let db = db().await;
        upsert(&db, 2, None, None).await.unwrap();
        let expires = Utc::now() + Duration::days(30);
        activate_tier(&db, 2, SubscriptionTier::Trial, Some(expires))
            .await
            .unwrap();

        let user = get_by_telegram_id(&db, 2).await.unwrap().unwrap();
        assert_eq!(user.tier, SubscriptionTier::Trial);
        assert_eq!(user.retention_days, 30);
        assert!(user.subscription_active(Utc::now()));
    }

    #[tokio::test]
    async fn retention_override_is_range_checked() {
        let db = db().await;
        upsert(&db, 3, None, None).await.unwrap();
        assert!(set_retention_days(&db, 3, 0).await.is_err());
        assert!(set_retention_days(&db, 3, 366).await.is_err());
        set_retention_days(&db, 3, 45).await.unwrap();
        let user = get_by_telegram_id(&db, 3).await.unwrap().unwrap();
        assert_eq!(user.retention_days, 45);
    }

    #[tokio::test]
    async fn feature_flags_roundtrip() {
        let db = db().await;
        upsert(&db, 4, None, None).await.unwrap();
        let flags = FeatureFlags {
            hybrid_search: Some(false),
            query_expansion: Some(true),
            mentions_enabled: None,
        };
        set_feature_flags(&db, 4, &flags).await.unwrap();
        let user = get_by_telegram_id(&db, 4).await.unwrap().unwrap();
        assert_eq!(user.feature_flags, flags);
    }

    #[tokio::test]
    async fn authenticated_listing_filters() {
        let db = db().await;
        upsert(&db, 10, None, None).await.unwrap();
        upsert(&db, 11, None, None).await.unwrap();
        set_auth_status(&db, 11, AuthStatus::Authenticated)
            .await
            .unwrap();

        assert_eq!(list_all(&db).await.unwrap().len(), 2);
        let authed = list_authenticated(&db).await.unwrap();
        assert_eq!(authed.len(), 1);
        assert_eq!(authed[0].telegram_id, 11);
    }

    #[tokio::test]
    async fn delete_removes_user() {
        let db = db().await;
        upsert(&db, 20, None, None).await.unwrap();
        assert!(delete(&db, 20).await.unwrap());
        assert!(!delete(&db, 20).await.unwrap());
        assert!(get_by_telegram_id(&db, 20).await.unwrap().is_none());
    }
}
