// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embeddings service for Grapevine: token counting, token-aware chunking
//! with overlap, the rate-limited primary HTTP embedder, the local ONNX
//! fallback, and the fan-out service gluing them together.

pub mod http;
pub mod onnx;
pub mod service;
pub mod tokens;

pub use http::HttpEmbedder;
pub use onnx::OnnxEmbedder;
pub use service::{Embedded, EmbeddingService};
pub use tokens::{TextChunk, TokenCounter};
