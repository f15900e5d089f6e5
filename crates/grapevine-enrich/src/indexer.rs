// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-post indexing pipeline: skip-if-empty → chunk → embed → upsert →
//! record status, with batch and resume variants.
//!
//! Chunks of one post are embedded and upserted strictly in order, so
//! `chunk_index` is monotonic for downstream consumers. A provider switch
//! (detected through the collection signature) drops the user's collection
//! and their status rows, forcing a clean re-index.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use grapevine_core::GrapevineError;
use grapevine_core::time::to_db_timestamp;
use grapevine_core::traits::{GraphStore, VectorIndex};
use grapevine_core::types::{ChunkPayload, ChunkPoint, GraphPost, IndexOutcome};
use grapevine_embeddings::{Embedded, EmbeddingService, TextChunk};
use grapevine_store::models::IndexingStatus;
use grapevine_store::queries::{channels, collections, indexing, posts, users};
use grapevine_store::{Database, Post};
use grapevine_vector::chunk_point_id;

/// Outcome summary of a batch indexing run. At most ten error strings are
/// retained.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl BatchReport {
    fn record_error(&mut self, post_id: i64, error: &GrapevineError) {
        self.failed += 1;
        if self.errors.len() < 10 {
            self.errors.push(format!("post {post_id}: {error}"));
        }
    }
}

/// The per-post indexing pipeline.
pub struct Indexer {
    db: Database,
    vectors: Arc<dyn VectorIndex>,
    graph: Option<Arc<dyn GraphStore>>,
    embeddings: Arc<EmbeddingService>,
}

impl Indexer {
    pub fn new(
        db: Database,
        vectors: Arc<dyn VectorIndex>,
        graph: Option<Arc<dyn GraphStore>>,
        embeddings: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            db,
            vectors,
            graph,
            embeddings,
        }
    }

    /// Index one post. Failures are recorded in `indexing_status` (error
    /// truncated by the store) and returned to the caller.
    pub async fn index_post(&self, post_id: i64) -> Result<IndexOutcome, GrapevineError> {
        let post = posts::get(&self.db, post_id)
            .await?
            .ok_or_else(|| GrapevineError::Validation(format!("post {post_id} not found")))?;

        match self.index_post_inner(&post).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let status = IndexingStatus {
                    user_id: post.user_id,
                    post_id: post.id,
                    vector_id: None,
                    status: IndexOutcome::Failed,
                    error: Some(e.to_string()),
                    indexed_at: Utc::now(),
                };
                if let Err(store_err) = indexing::upsert(&self.db, &status).await {
                    warn!(post_id, error = %store_err, "failed to record indexing failure");
                }
                Err(e)
            }
        }
    }

    async fn index_post_inner(&self, post: &Post) -> Result<IndexOutcome, GrapevineError> {
        let text = indexable_text(post);
        if text.trim().is_empty() {
            let status = IndexingStatus {
                user_id: post.user_id,
                post_id: post.id,
                vector_id: None,
                status: IndexOutcome::Skipped,
                error: None,
                indexed_at: Utc::now(),
            };
            indexing::upsert(&self.db, &status).await?;
            return Ok(IndexOutcome::Skipped);
        }

        let channel = channels::get_by_id(&self.db, post.channel_id)
            .await?
            .ok_or_else(|| {
                GrapevineError::Integrity(format!("post {} has no channel row", post.id))
            })?;

        // Chunk for the primary window first; if the first embedding came
        // from another provider, re-chunk for that provider's window and
        // re-embed the lot.
        let (primary_max, primary_overlap) = self.embeddings.primary_window();
        let mut chunks = self.embeddings.chunk_text(&text, primary_max, primary_overlap);
        if chunks.is_empty() {
            return Err(GrapevineError::Internal("chunker produced no chunks".into()));
        }

        let first = self.embeddings.embed(&chunks[0].text).await?;
        let active_window = self.embeddings.window_for(&first.provider);
        let embedded: Vec<Embedded> = if active_window != (primary_max, primary_overlap) {
            chunks = self
                .embeddings
                .chunk_text(&text, active_window.0, active_window.1);
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            self.embeddings.embed_batch(&texts).await?
        } else {
            let mut all = vec![first];
            for chunk in &chunks[1..] {
                all.push(self.embeddings.embed(&chunk.text).await?);
            }
            all
        };

        let signature = embedded[0].signature();
        let vector_size = embedded[0].vector.len();
        self.ensure_signature(post.user_id, vector_size, &signature).await?;

        let points = build_points(post, &channel.channel_username, &chunks, embedded);
        self.vectors.upsert_batch(post.user_id, points).await?;

        let status = IndexingStatus {
            user_id: post.user_id,
            post_id: post.id,
            vector_id: Some(chunk_point_id(post.id, 0)),
            status: IndexOutcome::Success,
            error: None,
            indexed_at: Utc::now(),
        };
        indexing::upsert(&self.db, &status).await?;
        metrics::counter!("grapevine_posts_indexed_total").increment(1);

        self.mirror_to_graph(post, &channel.channel_username).await;
        Ok(IndexOutcome::Success)
    }

    /// Compare the active provider signature with the collection record;
    /// a mismatch wipes the collection and status rows before re-use.
    async fn ensure_signature(
        &self,
        user_id: i64,
        vector_size: usize,
        signature: &str,
    ) -> Result<(), GrapevineError> {
        if let Some(stored) = collections::get(&self.db, user_id).await? {
            if stored.provider_signature != signature {
                warn!(
                    user_id,
                    old = %stored.provider_signature,
                    new = %signature,
                    "embedding provider switched, recreating collection"
                );
                self.vectors.drop_collection(user_id).await?;
                indexing::wipe_user(&self.db, user_id).await?;
            }
        }
        self.vectors.ensure_collection(user_id, vector_size).await?;
        collections::set(&self.db, user_id, vector_size, signature).await
    }

    /// Graph writes are opportunistic; failures are dropped with a warning.
    async fn mirror_to_graph(&self, post: &Post, channel_username: &str) {
        let Some(graph) = &self.graph else { return };
        let telegram_id = match users::get_by_id(&self.db, post.user_id).await {
            Ok(Some(user)) => user.telegram_id,
            _ => return,
        };
        let graph_post = GraphPost {
            post_id: post.id,
            telegram_id,
            channel_id: post.channel_id,
            channel_username: channel_username.to_string(),
            posted_at: post.posted_at,
            tags: post.tags.clone().unwrap_or_default(),
        };
        if let Err(e) = graph.upsert_post(&graph_post).await {
            warn!(post_id = post.id, error = %e, "graph mirror dropped");
        }
    }

    /// Index many posts with per-post error isolation.
    pub async fn index_batch(&self, post_ids: &[i64]) -> BatchReport {
        let mut report = BatchReport {
            total: post_ids.len(),
            ..BatchReport::default()
        };
        for &post_id in post_ids {
            match self.index_post(post_id).await {
                Ok(IndexOutcome::Success) => report.success += 1,
                Ok(IndexOutcome::Skipped) => report.skipped += 1,
                Ok(IndexOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    debug!(post_id, error = %e, "indexing failed");
                    report.record_error(post_id, &e);
                }
            }
        }
        report
    }

    /// Index posts that have no status row yet, oldest first.
    pub async fn catch_up(&self, limit: usize) -> Result<BatchReport, GrapevineError> {
        let pending = posts::unindexed(&self.db, limit).await?;
        let ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
        Ok(self.index_batch(&ids).await)
    }

    /// Wipe a user's indexing state and rebuild their whole collection.
    pub async fn reindex_user(&self, user_id: i64) -> Result<BatchReport, GrapevineError> {
        indexing::wipe_user(&self.db, user_id).await?;
        self.vectors.drop_collection(user_id).await?;
        let ids = posts::ids_for_user(&self.db, user_id).await?;
        Ok(self.index_batch(&ids).await)
    }
}

/// The text that actually gets indexed: the post body plus any crawled
/// link markdown.
fn indexable_text(post: &Post) -> String {
    match &post.enriched_content {
        Some(markdown) if !markdown.trim().is_empty() => {
            format!("{}\n\n{}", post.text, markdown)
        }
        _ => post.text.clone(),
    }
}

fn build_points(
    post: &Post,
    channel_username: &str,
    chunks: &[TextChunk],
    embedded: Vec<Embedded>,
) -> Vec<ChunkPoint> {
    let total_chunks = chunks.len();
    chunks
        .iter()
        .zip(embedded)
        .enumerate()
        .map(|(i, (_, embedding))| ChunkPoint {
            id: chunk_point_id(post.id, i),
            vector: embedding.vector,
            payload: ChunkPayload {
                post_id: post.id,
                channel_id: post.channel_id,
                channel_username: channel_username.to_string(),
                posted_at: to_db_timestamp(post.posted_at),
                tags: post.tags.clone().unwrap_or_default(),
                url: post.url.clone(),
                views: post.views,
                chunk_index: i,
                total_chunks,
                embedding_provider: embedding.provider,
            },
        })
        .collect()
}
