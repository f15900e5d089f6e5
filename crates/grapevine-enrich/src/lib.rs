// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post enrichment for Grapevine: the LLM tagger, the chunk-and-embed
//! indexer, and the retention reaper keeping all three stores consistent.

pub mod indexer;
pub mod reaper;
pub mod tagger;

pub use indexer::{BatchReport, Indexer};
pub use reaper::{CleanupReport, RetentionReaper};
pub use tagger::{Tagger, TaggerReport};
