// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory vector index for tests and single-node development.
//!
//! Implements the same trait and semantics as the qdrant backend: per-user
//! collections, cosine scores, payload filters, threshold and limit.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use grapevine_core::GrapevineError;
use grapevine_core::traits::VectorIndex;
use grapevine_core::types::{ChunkPoint, VectorFilter, VectorHit};

#[derive(Default)]
struct Collection {
    vector_size: usize,
    points: HashMap<String, (Vec<f32>, grapevine_core::types::ChunkPayload)>,
}

/// Process-local vector index.
#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<i64, Collection>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    dot / (na * nb)
}

fn matches_filter(payload: &grapevine_core::types::ChunkPayload, filter: &VectorFilter) -> bool {
    if let Some(channel_id) = filter.channel_id {
        if payload.channel_id != channel_id {
            return false;
        }
    }
    if let Some(tags) = &filter.tags {
        if !tags.is_empty() && !tags.iter().any(|t| payload.tags.contains(t)) {
            return false;
        }
    }
    true
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(
        &self,
        user_id: i64,
        vector_size: usize,
    ) -> Result<(), GrapevineError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(user_id)
            .or_insert_with(|| Collection {
                vector_size,
                points: HashMap::new(),
            });
        Ok(())
    }

    async fn upsert_batch(
        &self,
        user_id: i64,
        points: Vec<ChunkPoint>,
    ) -> Result<(), GrapevineError> {
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(&user_id).ok_or_else(|| {
            GrapevineError::Vector {
                message: format!("collection for user {user_id} does not exist"),
            }
        })?;
        for point in points {
            if point.vector.len() != collection.vector_size {
                return Err(GrapevineError::Vector {
                    message: format!(
                        "vector size {} does not match collection size {}",
                        point.vector.len(),
                        collection.vector_size
                    ),
                });
            }
            collection.points.insert(point.id, (point.vector, point.payload));
        }
        Ok(())
    }

    async fn search(
        &self,
        user_id: i64,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>, GrapevineError> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&user_id) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<VectorHit> = collection
            .points
            .iter()
            .filter(|(_, (_, payload))| matches_filter(payload, filter))
            .filter_map(|(id, (vector, payload))| {
                let score = cosine(query, vector);
                (score >= score_threshold).then(|| VectorHit {
                    id: id.clone(),
                    score,
                    payload: payload.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_posts(&self, user_id: i64, post_ids: &[i64]) -> Result<(), GrapevineError> {
        let mut collections = self.collections.write().await;
        if let Some(collection) = collections.get_mut(&user_id) {
            collection
                .points
                .retain(|_, (_, payload)| !post_ids.contains(&payload.post_id));
        }
        Ok(())
    }

    async fn drop_collection(&self, user_id: i64) -> Result<(), GrapevineError> {
        self.collections.write().await.remove(&user_id);
        Ok(())
    }

    async fn count(&self, user_id: i64) -> Result<usize, GrapevineError> {
        let collections = self.collections.read().await;
        Ok(collections.get(&user_id).map(|c| c.points.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::chunk_point_id;
    use grapevine_core::types::ChunkPayload;

    fn payload(post_id: i64, channel_id: i64, tags: &[&str]) -> ChunkPayload {
        ChunkPayload {
            post_id,
            channel_id,
            channel_username: "ai_news".to_string(),
            posted_at: "2026-01-01T00:00:00Z".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            url: None,
            views: None,
            chunk_index: 0,
            total_chunks: 1,
            embedding_provider: "primary".to_string(),
        }
    }

    fn point(post_id: i64, channel_id: i64, vector: Vec<f32>, tags: &[&str]) -> ChunkPoint {
        ChunkPoint {
            id: chunk_point_id(post_id, 0),
            vector,
            payload: payload(post_id, channel_id, tags),
        }
    }

    #[tokio::test]
    async fn upsert_requires_collection() {
        let index = MemoryIndex::new();
        let result = index
            .upsert_batch(1, vec![point(1, 10, vec![1.0, 0.0], &[])])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn search_sorts_and_thresholds() {
        let index = MemoryIndex::new();
        index.ensure_collection(1, 2).await.unwrap();
        index
            .upsert_batch(
                1,
                vec![
                    point(1, 10, vec![1.0, 0.0], &["ai"]),
                    point(2, 10, vec![0.7, 0.7], &["rust"]),
                    point(3, 10, vec![0.0, 1.0], &["cooking"]),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .search(1, &[1.0, 0.0], 10, 0.5, &VectorFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2, "orthogonal vector is below threshold");
        assert_eq!(hits[0].payload.post_id, 1);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn filters_restrict_results() {
        let index = MemoryIndex::new();
        index.ensure_collection(1, 2).await.unwrap();
        index
            .upsert_batch(
                1,
                vec![
                    point(1, 10, vec![1.0, 0.0], &["ai"]),
                    point(2, 20, vec![1.0, 0.0], &["rust", "ai"]),
                ],
            )
            .await
            .unwrap();

        let by_channel = index
            .search(
                1,
                &[1.0, 0.0],
                10,
                0.0,
                &VectorFilter {
                    channel_id: Some(20),
                    tags: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(by_channel.len(), 1);
        assert_eq!(by_channel[0].payload.post_id, 2);

        let by_tag = index
            .search(
                1,
                &[1.0, 0.0],
                10,
                0.0,
                &VectorFilter {
                    channel_id: None,
                    tags: Some(vec!["rust".to_string()]),
                },
            )
            .await
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].payload.post_id, 2);
    }

    #[tokio::test]
    async fn collections_are_isolated_per_user() {
        let index = MemoryIndex::new();
        index.ensure_collection(1, 2).await.unwrap();
        index.ensure_collection(2, 2).await.unwrap();
        index
            .upsert_batch(1, vec![point(1, 10, vec![1.0, 0.0], &[])])
            .await
            .unwrap();

        let foreign = index
            .search(2, &[1.0, 0.0], 10, 0.0, &VectorFilter::default())
            .await
            .unwrap();
        assert!(foreign.is_empty(), "user 2 must never see user 1's points");
        assert_eq!(index.count(1).await.unwrap(), 1);
        assert_eq!(index.count(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reindexing_is_idempotent_via_point_ids() {
        let index = MemoryIndex::new();
        index.ensure_collection(1, 2).await.unwrap();
        index
            .upsert_batch(1, vec![point(1, 10, vec![1.0, 0.0], &[])])
            .await
            .unwrap();
        index
            .upsert_batch(1, vec![point(1, 10, vec![0.0, 1.0], &[])])
            .await
            .unwrap();
        assert_eq!(index.count(1).await.unwrap(), 1, "same id overwrote");
    }

    #[tokio::test]
    async fn delete_by_posts_and_drop() {
        let index = MemoryIndex::new();
        index.ensure_collection(1, 2).await.unwrap();
        index
            .upsert_batch(
                1,
                vec![
                    point(1, 10, vec![1.0, 0.0], &[]),
                    point(2, 10, vec![0.0, 1.0], &[]),
                ],
            )
            .await
            .unwrap();

        index.delete_by_posts(1, &[1]).await.unwrap();
        assert_eq!(index.count(1).await.unwrap(), 1);

        index.drop_collection(1).await.unwrap();
        assert_eq!(index.count(1).await.unwrap(), 0);
        // Idempotent on a missing collection.
        index.drop_collection(1).await.unwrap();
    }

    #[tokio::test]
    async fn size_mismatch_is_rejected() {
        let index = MemoryIndex::new();
        index.ensure_collection(1, 3).await.unwrap();
        let result = index
            .upsert_batch(1, vec![point(1, 10, vec![1.0, 0.0], &[])])
            .await;
        assert!(result.is_err());
    }
}
