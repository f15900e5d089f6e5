// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rolling log of RAG questions; feeds implicit-interest inference.

use chrono::{DateTime, Utc};
use rusqlite::params;

use grapevine_core::GrapevineError;
use grapevine_core::time::{parse_db_timestamp, to_db_timestamp};

use crate::database::{Database, map_tr_err};

/// Append a question to the user's query history.
pub async fn record(
    db: &Database,
    user_id: i64,
    query: &str,
    asked_at: DateTime<Utc>,
) -> Result<(), GrapevineError> {
    let query = query.to_string();
    let ts = to_db_timestamp(asked_at);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO rag_query_history (user_id, query, asked_at) VALUES (?1, ?2, ?3)",
                params![user_id, query, ts],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The user's most recent questions, newest first.
pub async fn recent(
    db: &Database,
    user_id: i64,
    limit: usize,
) -> Result<Vec<(String, DateTime<Utc>)>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT query, asked_at FROM rag_query_history
                 WHERE user_id = ?1 ORDER BY asked_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![user_id, limit as i64], |row| {
                    let query: String = row.get(0)?;
                    let asked_at: String = row.get(1)?;
                    Ok((query, parse_db_timestamp(&asked_at)))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

/// Drop history entries older than `cutoff`; returns rows removed.
pub async fn prune(
    db: &Database,
    user_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<usize, GrapevineError> {
    let cutoff_s = to_db_timestamp(cutoff);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM rag_query_history WHERE user_id = ?1 AND asked_at < ?2",
                params![user_id, cutoff_s],
            )?;
            Ok(n)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users;
    use chrono::Duration;

    #[tokio::test]
    async fn record_and_recent_ordering() {
        let db = Database::open_in_memory().await.unwrap();
        let user = users::upsert(&db, 1, None, None).await.unwrap();
        let now = Utc::now();

        record(&db, user.id, "что нового про ai?", now - Duration::hours(2))
            .await
            .unwrap();
        record(&db, user.id, "rust news", now - Duration::hours(1))
            .await
            .unwrap();
        record(&db, user.id, "llm benchmarks", now).await.unwrap();

        let recent_rows = recent(&db, user.id, 2).await.unwrap();
        assert_eq!(recent_rows.len(), 2);
        assert_eq!(recent_rows[0].0, "llm benchmarks");
        assert_eq!(recent_rows[1].0, "rust news");
    }

    #[tokio::test]
    async fn prune_drops_old_entries() {
        let db = Database::open_in_memory().await.unwrap();
        let user = users::upsert(&db, 1, None, None).await.unwrap();
        let now = Utc::now();

        record(&db, user.id, "old", now - Duration::days(40)).await.unwrap();
        record(&db, user.id, "fresh", now).await.unwrap();

        let removed = prune(&db, user.id, now - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        let remaining = recent(&db, user.id, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, "fresh");
    }
}
