// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider trait.

use async_trait::async_trait;

use crate::error::GrapevineError;

/// A single embedding backend (the rate-limited primary endpoint or the
/// local fallback model).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name recorded in chunk payloads as `embedding_provider`.
    fn name(&self) -> &str;

    /// Chunk window for this provider. The primary gets a larger window
    /// than the fallback.
    fn max_chunk_tokens(&self) -> usize;

    /// Overlap between consecutive chunks, strictly less than
    /// [`Self::max_chunk_tokens`].
    fn overlap_tokens(&self) -> usize;

    /// Embed one text. The vector size is fixed per provider and
    /// discovered on first call.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GrapevineError>;
}
