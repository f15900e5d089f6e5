// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Invite codes, consumed atomically.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use grapevine_core::GrapevineError;
use grapevine_core::time::{parse_db_timestamp, to_db_timestamp};
use grapevine_core::types::SubscriptionTier;

use crate::database::{Database, map_tr_err};
use crate::models::InviteCode;

fn row_to_invite(row: &rusqlite::Row) -> rusqlite::Result<InviteCode> {
    let expires_at: String = row.get(1)?;
    let tier: String = row.get(4)?;
    Ok(InviteCode {
        code: row.get(0)?,
        expires_at: parse_db_timestamp(&expires_at),
        max_uses: row.get(2)?,
        uses_count: row.get(3)?,
        default_tier: tier.parse().unwrap_or(SubscriptionTier::Trial),
        default_trial_days: row.get(5)?,
    })
}

/// Create an invite code. Codes are short uppercase strings.
pub async fn create(
    db: &Database,
    code: &str,
    expires_at: DateTime<Utc>,
    max_uses: u32,
    default_tier: SubscriptionTier,
    default_trial_days: Option<u32>,
) -> Result<InviteCode, GrapevineError> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        return Err(GrapevineError::Validation("empty invite code".into()));
    }
    let expires_s = to_db_timestamp(expires_at);
    let tier_s = default_tier.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO invite_codes (code, expires_at, max_uses, default_tier, default_trial_days)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![code, expires_s, max_uses, tier_s, default_trial_days],
            )?;
            let invite = conn.query_row(
                "SELECT code, expires_at, max_uses, uses_count, default_tier, default_trial_days
                 FROM invite_codes WHERE code = ?1",
                params![code],
                row_to_invite,
            )?;
            Ok(invite)
        })
        .await
        .map_err(map_tr_err)
}

/// Look up an invite code (case-insensitive).
pub async fn get(db: &Database, code: &str) -> Result<Option<InviteCode>, GrapevineError> {
    let code = code.trim().to_uppercase();
    db.connection()
        .call(move |conn| {
            let invite = conn
                .query_row(
                    "SELECT code, expires_at, max_uses, uses_count, default_tier, default_trial_days
                     FROM invite_codes WHERE code = ?1",
                    params![code],
                    row_to_invite,
                )
                .optional()?;
            Ok(invite)
        })
        .await
        .map_err(map_tr_err)
}

/// Consume one use of an invite code.
///
/// A single conditional UPDATE makes the `valid → used` transition atomic
/// under the store's single-writer discipline: `uses_count` can never
/// exceed `max_uses`, no matter how many callers race.
pub async fn consume(
    db: &Database,
    code: &str,
    now: DateTime<Utc>,
) -> Result<Option<InviteCode>, GrapevineError> {
    let code = code.trim().to_uppercase();
    let now_s = to_db_timestamp(now);
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE invite_codes SET uses_count = uses_count + 1
                 WHERE code = ?1 AND uses_count < max_uses AND expires_at > ?2",
                params![code, now_s],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let invite = conn.query_row(
                "SELECT code, expires_at, max_uses, uses_count, default_tier, default_trial_days
                 FROM invite_codes WHERE code = ?1",
                params![code],
                row_to_invite,
            )?;
            Ok(Some(invite))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_uppercases_code() {
        let db = db().await;
        let invite = create(
            &db,
            "welcome1",
            Utc::now() + Duration::days(7),
            3,
            SubscriptionTier::Trial,
            Some(14),
        )
        .await
        .unwrap();
        assert_eq!(invite.code, "WELCOME1");
        assert_eq!(invite.uses_count, 0);
        assert!(get(&db, "welcome1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn consume_respects_max_uses() {
        let db = db().await;
        create(
            &db,
            "LIMITED",
            Utc::now() + Duration::days(7),
            2,
            SubscriptionTier::Basic,
            None,
        )
        .await
        .unwrap();

        let now = Utc::now();
        assert_eq!(consume(&db, "LIMITED", now).await.unwrap().unwrap().uses_count, 1);
        assert_eq!(consume(&db, "LIMITED", now).await.unwrap().unwrap().uses_count, 2);
        assert!(consume(&db, "LIMITED", now).await.unwrap().is_none());

        let invite = get(&db, "LIMITED").await.unwrap().unwrap();
        assert_eq!(invite.uses_count, 2);
    }

    #[tokio::test]
    async fn expired_codes_cannot_be_consumed() {
        let db = db().await;
        create(
            &db,
            "EXPIRED",
            Utc::now() - Duration::days(1),
            10,
            SubscriptionTier::Trial,
            None,
        )
        .await
        .unwrap();
        assert!(consume(&db, "EXPIRED", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_consumers_never_oversubscribe() {
        let db = db().await;
        create(
            &db,
            "RACE",
            Utc::now() + Duration::days(1),
            3,
            SubscriptionTier::Trial,
            None,
        )
        .await
        .unwrap();

        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                consume(&db, "RACE", now).await.unwrap().is_some()
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 3, "exactly max_uses consumptions succeed");
        assert_eq!(get(&db, "RACE").await.unwrap().unwrap().uses_count, 3);
    }
}
