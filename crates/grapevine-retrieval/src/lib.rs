// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieval for Grapevine: baseline and hybrid search over a user's
//! indexed posts, LLM answer synthesis, and digest generation.

pub mod digest;
pub mod engine;

pub use digest::{DigestGenerator, DigestOutcome};
pub use engine::{
    Answer, NO_CONTEXT_REPLY, RetrievalDefaults, RetrievalEngine, SearchFilters, SearchHit,
};
