// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user vector collection signatures: the provider-switch detection
//! record. A signature mismatch forces collection recreation + re-index.

use rusqlite::{OptionalExtension, params};

use grapevine_core::GrapevineError;
use grapevine_core::time::to_db_timestamp;

use crate::database::{Database, map_tr_err};
use crate::models::CollectionSignature;

/// The recorded signature for a user's collection, if any.
pub async fn get(
    db: &Database,
    user_id: i64,
) -> Result<Option<CollectionSignature>, GrapevineError> {
    db.connection()
        .call(move |conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, vector_size, provider_signature
                     FROM vector_collections WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(CollectionSignature {
                            user_id: row.get(0)?,
                            vector_size: row.get::<_, i64>(1)? as usize,
                            provider_signature: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
        .map_err(map_tr_err)
}

/// Record the signature after (re)creating a collection.
pub async fn set(
    db: &Database,
    user_id: i64,
    vector_size: usize,
    provider_signature: &str,
) -> Result<(), GrapevineError> {
    let signature = provider_signature.to_string();
    let now = to_db_timestamp(chrono::Utc::now());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO vector_collections (user_id, vector_size, provider_signature, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                     vector_size = excluded.vector_size,
                     provider_signature = excluded.provider_signature,
                     updated_at = excluded.updated_at",
                params![user_id, vector_size as i64, signature, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::users;

    #[tokio::test]
    async fn signature_roundtrip_and_replace() {
        let db = Database::open_in_memory().await.unwrap();
        let user = users::upsert(&db, 1, None, None).await.unwrap();

        assert!(get(&db, user.id).await.unwrap().is_none());

        set(&db, user.id, 1536, "primary:text-embedding-3-small:1536")
            .await
            .unwrap();
        let sig = get(&db, user.id).await.unwrap().unwrap();
        assert_eq!(sig.vector_size, 1536);

        set(&db, user.id, 384, "fallback:all-MiniLM-L6-v2:384")
            .await
            .unwrap();
        let sig = get(&db, user.id).await.unwrap().unwrap();
        assert_eq!(sig.vector_size, 384);
        assert!(sig.provider_signature.starts_with("fallback:"));
    }
}
