// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat provider trait for LLM completions.

use async_trait::async_trait;

use crate::error::GrapevineError;
use crate::types::{ChatRequest, ChatResponse};

/// An LLM chat completion provider.
///
/// Implementations handle their own transient retry; callers treat a
/// returned error as final for the current attempt.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name recorded in logs and digests.
    fn name(&self) -> &str;

    /// Run a single completion.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, GrapevineError>;
}
