// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic embedding provider for tests.
//!
//! Vectors are derived from the text bytes with strictly positive
//! components, so cosine similarity between any two embeddings is
//! positive and search results never vanish under a zero threshold.
//! A fixed vector can be scripted for ranking tests that need exact
//! scores.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use grapevine_core::GrapevineError;
use grapevine_core::traits::EmbeddingProvider;

pub struct MockEmbedder {
    name: &'static str,
    dims: usize,
    max_chunk_tokens: usize,
    overlap_tokens: usize,
    fixed: Mutex<Option<Vec<f32>>>,
    fail: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockEmbedder {
    /// An 8-dimensional provider with the larger "primary" chunk window.
    pub fn primary() -> Self {
        Self::named("primary", 8, 64, 8)
    }

    /// A 4-dimensional provider with the smaller "local" window.
    pub fn local() -> Self {
        Self::named("local", 4, 32, 4)
    }

    pub fn named(
        name: &'static str,
        dims: usize,
        max_chunk_tokens: usize,
        overlap_tokens: usize,
    ) -> Self {
        Self {
            name,
            dims,
            max_chunk_tokens,
            overlap_tokens,
            fixed: Mutex::new(None),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every subsequent `embed` returns exactly this vector.
    pub fn fix_vector(&self, vector: Vec<f32>) {
        *self.fixed.lock().unwrap() = Some(vector);
    }

    /// Make every subsequent `embed` fail with a transient error.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently running `embed` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn derive(&self, text: &str) -> Vec<f32> {
        let bytes = text.as_bytes();
        (0..self.dims)
            .map(|i| match bytes.is_empty() {
                true => 1.0,
                false => f32::from(bytes[i % bytes.len()]) + i as f32 + 1.0,
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn name(&self) -> &str {
        self.name
    }

    fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens
    }

    fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GrapevineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        // A request is never instantaneous; overlap shows up in max_in_flight.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(GrapevineError::transient("mock embedder down"));
        }
        if let Some(fixed) = self.fixed.lock().unwrap().clone() {
            return Ok(fixed);
        }
        Ok(self.derive(text))
    }
}
