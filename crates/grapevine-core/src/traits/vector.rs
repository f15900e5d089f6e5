// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector index trait over per-user chunk collections.

use async_trait::async_trait;

use crate::error::GrapevineError;
use crate::types::{ChunkPoint, VectorFilter, VectorHit};

/// A vector store holding one cosine-distance collection per user.
///
/// Point ids are deterministic UUIDv5 strings so re-indexing a post is
/// idempotent and deletes need no secondary lookup table.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the user's collection and payload indexes if absent. Idempotent.
    async fn ensure_collection(
        &self,
        user_id: i64,
        vector_size: usize,
    ) -> Result<(), GrapevineError>;

    /// Upsert a batch of chunk points into the user's collection, in order.
    async fn upsert_batch(
        &self,
        user_id: i64,
        points: Vec<ChunkPoint>,
    ) -> Result<(), GrapevineError>;

    /// Similarity search in the user's collection.
    async fn search(
        &self,
        user_id: i64,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>, GrapevineError>;

    /// Delete every point whose payload `post_id` is in `post_ids`.
    async fn delete_by_posts(&self, user_id: i64, post_ids: &[i64]) -> Result<(), GrapevineError>;

    /// Drop the user's whole collection. Idempotent.
    async fn drop_collection(&self, user_id: i64) -> Result<(), GrapevineError>;

    /// Live point count in the user's collection (0 if absent).
    async fn count(&self, user_id: i64) -> Result<usize, GrapevineError>;
}
