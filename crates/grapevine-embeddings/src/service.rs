// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding fan-out: primary provider behind a global single-flight
//! gate, local fallback, optional cache reuse.

use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use grapevine_core::GrapevineError;
use grapevine_core::traits::{Cache, EmbeddingProvider};

use crate::tokens::{TextChunk, TokenCounter};

const EMBEDDING_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

/// An embedding together with the provider that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub provider: String,
}

impl Embedded {
    /// Signature recorded per collection to detect provider switches.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.provider, self.vector.len())
    }
}

/// Provider fan-out with token utilities.
///
/// The primary endpoint is single-request limited, so every primary call
/// goes through a process-wide `Semaphore(1)`; a distributed deployment
/// must move this gate to a shared leaser or accept per-replica
/// concurrency.
pub struct EmbeddingService {
    primary: Arc<dyn EmbeddingProvider>,
    fallback: Option<Arc<dyn EmbeddingProvider>>,
    cache: Option<Arc<dyn Cache>>,
    counter: TokenCounter,
    primary_gate: Semaphore,
}

impl EmbeddingService {
    pub fn new(
        primary: Arc<dyn EmbeddingProvider>,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
        cache: Option<Arc<dyn Cache>>,
    ) -> Self {
        Self {
            primary,
            fallback,
            cache,
            counter: TokenCounter::new(),
            primary_gate: Semaphore::new(1),
        }
    }

    /// Chunk window of the primary provider.
    pub fn primary_window(&self) -> (usize, usize) {
        (self.primary.max_chunk_tokens(), self.primary.overlap_tokens())
    }

    /// Chunk window of the named provider (fallback gets a smaller one).
    pub fn window_for(&self, provider: &str) -> (usize, usize) {
        if provider == self.primary.name() {
            return self.primary_window();
        }
        match &self.fallback {
            Some(fallback) if fallback.name() == provider => {
                (fallback.max_chunk_tokens(), fallback.overlap_tokens())
            }
            _ => self.primary_window(),
        }
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    pub fn chunk_text(
        &self,
        text: &str,
        max_tokens: usize,
        overlap_tokens: usize,
    ) -> Vec<TextChunk> {
        self.counter.chunk_text(text, max_tokens, overlap_tokens)
    }

    /// Embed one text: cache, then primary (serialized, with its own
    /// retries), then the local fallback.
    pub async fn embed(&self, text: &str) -> Result<Embedded, GrapevineError> {
        let cache_key = format!("embedding:{}", md5_hex(text));
        if let Some(cache) = &self.cache {
            if let Ok(Some(value)) = cache.get_json(&cache_key).await {
                if let Ok(cached) = serde_json::from_value::<Embedded>(value) {
                    debug!("embedding cache hit");
                    return Ok(cached);
                }
            }
        }

        let embedded = match self.embed_primary(text).await {
            Ok(vector) => Embedded {
                vector,
                provider: self.primary.name().to_string(),
            },
            Err(primary_err) => match &self.fallback {
                Some(fallback) => {
                    warn!(error = %primary_err, "primary embedder failed, using local fallback");
                    let vector = fallback.embed(text).await?;
                    Embedded {
                        vector,
                        provider: fallback.name().to_string(),
                    }
                }
                None => return Err(primary_err),
            },
        };

        if let Some(cache) = &self.cache {
            if let Ok(value) = serde_json::to_value(&embedded) {
                if let Err(e) = cache.set_json(&cache_key, &value, EMBEDDING_CACHE_TTL).await {
                    debug!(error = %e, "embedding cache write failed");
                }
            }
        }
        Ok(embedded)
    }

    /// Sequential batch embedding. The primary gate already serializes
    /// requests, so there is nothing to gain from fan-out here.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedded>, GrapevineError> {
        let mut embedded = Vec::with_capacity(texts.len());
        for text in texts {
            embedded.push(self.embed(text).await?);
        }
        Ok(embedded)
    }

    async fn embed_primary(&self, text: &str) -> Result<Vec<f32>, GrapevineError> {
        let _permit =
            self.primary_gate
                .acquire()
                .await
                .map_err(|_| GrapevineError::Internal(
                    "embedding gate closed".to_string(),
                ))?;
        self.primary.embed(text).await
    }
}

fn md5_hex(text: &str) -> String {
    hex::encode(Md5::digest(text.as_bytes()))
}
