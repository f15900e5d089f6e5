// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph store trait.
//!
//! The graph is an optional signal, never a source of truth. Callers in the
//! retrieval path degrade read errors to empty results; the indexer drops
//! failed writes with a warning.

use async_trait::async_trait;

use crate::error::GrapevineError;
use crate::types::{GraphExpansion, GraphPost, PostGraphContext, TagCount};

/// A property graph of `User`, `Channel`, `Post` and `Tag` nodes connected
/// by `SUBSCRIBES`, `POSTED_IN`, `TAGGED` and `RELATED_TO` edges.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Mirror a post and its tag edges into the graph.
    async fn upsert_post(&self, post: &GraphPost) -> Result<(), GrapevineError>;

    /// Top tags across the user's posts.
    async fn user_interests(
        &self,
        telegram_id: i64,
        limit: usize,
    ) -> Result<Vec<TagCount>, GrapevineError>;

    /// Most-used tags across all posts in a rolling window.
    async fn trending_tags(&self, days: u32, limit: usize)
    -> Result<Vec<TagCount>, GrapevineError>;

    /// For each source post, related posts sharing ≥ 2 tags or posted
    /// within a 24-hour window.
    async fn expand_posts(
        &self,
        post_ids: &[i64],
        limit_per_post: usize,
    ) -> Result<Vec<GraphExpansion>, GrapevineError>;

    /// Context summary for one post node.
    async fn post_context(&self, post_id: i64)
    -> Result<Option<PostGraphContext>, GrapevineError>;

    /// Remove post nodes (and their edges).
    async fn delete_posts(&self, post_ids: &[i64]) -> Result<(), GrapevineError>;

    /// Remove a user node and everything only it anchors.
    async fn delete_user(&self, telegram_id: i64) -> Result<(), GrapevineError>;
}
