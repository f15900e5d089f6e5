// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Indexing status rows, unique per (user, post).

use rusqlite::{OptionalExtension, params};

use grapevine_core::GrapevineError;
use grapevine_core::time::{parse_db_timestamp, to_db_timestamp};
use grapevine_core::types::IndexOutcome;

use crate::database::{Database, map_tr_err};
use crate::models::IndexingStatus;

/// Errors stored with a status row are capped at this length.
pub const MAX_ERROR_LEN: usize = 500;

fn row_to_status(row: &rusqlite::Row) -> rusqlite::Result<IndexingStatus> {
    let status: String = row.get(3)?;
    let indexed_at: String = row.get(5)?;
    Ok(IndexingStatus {
        user_id: row.get(0)?,
        post_id: row.get(1)?,
        vector_id: row.get(2)?,
        status: status.parse().unwrap_or(IndexOutcome::Failed),
        error: row.get(4)?,
        indexed_at: parse_db_timestamp(&indexed_at),
    })
}

/// Insert or replace the status row for (user, post). The error string is
/// truncated to [`MAX_ERROR_LEN`] characters.
pub async fn upsert(db: &Database, status: &IndexingStatus) -> Result<(), GrapevineError> {
    let user_id = status.user_id;
    let post_id = status.post_id;
    let vector_id = status.vector_id.clone();
    let outcome = status.status.to_string();
    let error = status
        .error
        .clone()
        .map(|e| e.chars().take(MAX_ERROR_LEN).collect::<String>());
    let indexed_at = to_db_timestamp(status.indexed_at);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO indexing_status (user_id, post_id, vector_id, status, error, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, post_id) DO UPDATE SET
                     vector_id = excluded.vector_id,
                     status = excluded.status,
                     error = excluded.error,
                     indexed_at = excluded.indexed_at",
                params![user_id, post_id, vector_id, outcome, error, indexed_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch the status row for (user, post).
pub async fn get(
    db: &Database,
    user_id: i64,
    post_id: i64,
) -> Result<Option<IndexingStatus>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let status = conn
                .query_row(
                    "SELECT user_id, post_id, vector_id, status, error, indexed_at
                     FROM indexing_status WHERE user_id = ?1 AND post_id = ?2",
                    params![user_id, post_id],
                    row_to_status,
                )
                .optional()?;
            Ok(status)
        })
        .await
        .map_err(map_tr_err)
}

/// All status rows for a user.
pub async fn for_user(db: &Database, user_id: i64) -> Result<Vec<IndexingStatus>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, post_id, vector_id, status, error, indexed_at
                 FROM indexing_status WHERE user_id = ?1 ORDER BY post_id",
            )?;
            let rows = stmt
                .query_map(params![user_id], row_to_status)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

/// Ids of a user's posts whose status matches `outcome`.
pub async fn post_ids_with_status(
    db: &Database,
    user_id: i64,
    outcome: IndexOutcome,
) -> Result<Vec<i64>, GrapevineError> {
    let outcome = outcome.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT post_id FROM indexing_status
                 WHERE user_id = ?1 AND status = ?2 ORDER BY post_id",
            )?;
            let ids = stmt
                .query_map(params![user_id, outcome], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(map_tr_err)
}

/// Count a user's rows with the given outcome.
pub async fn count_with_status(
    db: &Database,
    user_id: i64,
    outcome: IndexOutcome,
) -> Result<usize, GrapevineError> {
    let outcome = outcome.to_string();
    db.connection()
        .call(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT count(*) FROM indexing_status WHERE user_id = ?1 AND status = ?2",
                params![user_id, outcome],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
        .map_err(map_tr_err)
}

/// Wipe every status row for a user (full re-index).
pub async fn wipe_user(db: &Database, user_id: i64) -> Result<usize, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM indexing_status WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(n)
        })
        .await
        .map_err(map_tr_err)
}
