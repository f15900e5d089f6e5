// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local ONNX embedding fallback (all-MiniLM-L6-v2, 384 dims).
//!
//! Last resort when the primary endpoint is down or exhausted its retries.
//! Inference is CPU-only, single-threaded, with attention-masked mean
//! pooling and L2 normalization. Gets a smaller chunk window than the
//! primary provider.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use ndarray::Array2;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;

use grapevine_core::GrapevineError;
use grapevine_core::traits::EmbeddingProvider;

/// Output dimensions of all-MiniLM-L6-v2.
pub const FALLBACK_DIM: usize = 384;

fn onnx_err(context: &str, e: impl std::fmt::Display) -> GrapevineError {
    GrapevineError::Provider {
        message: format!("{context}: {e}"),
        source: None,
    }
}

/// ONNX-backed local embedding provider.
pub struct OnnxEmbedder {
    /// ort sessions are not Sync; the Mutex serializes inference.
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    max_chunk_tokens: usize,
    overlap_tokens: usize,
}

// Safety: the Session is only touched under the Mutex; tokenizer encoding
// is thread-safe.
unsafe impl Send for OnnxEmbedder {}
unsafe impl Sync for OnnxEmbedder {}

impl OnnxEmbedder {
    /// Load `model.onnx` with a sibling `tokenizer.json`.
    pub fn new(
        model_path: &Path,
        max_chunk_tokens: usize,
        overlap_tokens: usize,
    ) -> Result<Self, GrapevineError> {
        let model_dir = model_path
            .parent()
            .ok_or_else(|| GrapevineError::Config("fallback model path has no parent".into()))?;
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| onnx_err("failed to load tokenizer", e))?;

        let session = Session::builder()
            .map_err(|e| onnx_err("failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| onnx_err("failed to set optimization level", e))?
            .with_intra_threads(1)
            .map_err(|e| onnx_err("failed to set thread count", e))?
            .commit_from_file(model_path)
            .map_err(|e| onnx_err("failed to load ONNX model", e))?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_chunk_tokens,
            overlap_tokens,
        })
    }

    fn run_inference(&self, text: &str) -> Result<Vec<f32>, GrapevineError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| onnx_err("tokenization failed", e))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> =
            encoding.get_type_ids().iter().map(|&t| t as i64).collect();
        let seq_len = input_ids.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| onnx_err("bad input_ids shape", e))?;
        let mask_array = Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| onnx_err("bad attention_mask shape", e))?;
        let type_ids = Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| onnx_err("bad token_type_ids shape", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| onnx_err("session lock poisoned", e))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => TensorRef::from_array_view(&input_ids)
                    .map_err(|e| onnx_err("input_ids tensor", e))?,
                "attention_mask" => TensorRef::from_array_view(&mask_array)
                    .map_err(|e| onnx_err("attention_mask tensor", e))?,
                "token_type_ids" => TensorRef::from_array_view(&type_ids)
                    .map_err(|e| onnx_err("token_type_ids tensor", e))?
            ])
            .map_err(|e| onnx_err("inference failed", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| onnx_err("failed to extract output tensor", e))?;
        let hidden = shape[shape.len() - 1] as usize;

        Ok(l2_normalize(&mean_pool(data, &attention_mask, seq_len, hidden)))
    }
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    fn name(&self) -> &str {
        "local"
    }

    fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens
    }

    fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GrapevineError> {
        self.run_inference(text)
    }
}

/// Attention-masked mean pooling over token embeddings.
fn mean_pool(embeddings: &[f32], attention_mask: &[i64], seq_len: usize, hidden: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;
    for (i, &mask) in attention_mask.iter().enumerate().take(seq_len) {
        if mask > 0 {
            for (j, slot) in sum.iter_mut().enumerate() {
                *slot += embeddings[i * hidden + j];
            }
            count += 1.0;
        }
    }
    if count > 0.0 {
        for slot in &mut sum {
            *slot /= count;
        }
    }
    sum
}

fn l2_normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Constructing an OnnxEmbedder needs model files on disk; inference is
    // covered by deployment smoke tests. The pooling math is unit-tested.

    #[test]
    fn mean_pool_ignores_padding() {
        let embeddings = vec![
            9.0, 9.0, // padded token
            1.0, 3.0, // real token
            3.0, 5.0, // real token
        ];
        let mask = vec![0, 1, 1];
        let pooled = mean_pool(&embeddings, &mask, 3, 2);
        assert_eq!(pooled, vec![2.0, 4.0]);
    }

    #[test]
    fn mean_pool_empty_mask_is_zero() {
        let pooled = mean_pool(&[1.0, 2.0], &[0], 1, 2);
        assert_eq!(pooled, vec![0.0, 0.0]);
    }

    #[test]
    fn l2_normalize_produces_unit_length() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_is_untouched() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
