// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM-based topic tagging.
//!
//! Each post gets 3–7 short lowercase tags from a structured prompt. Parse
//! and provider failures bump the attempt counter; past the cap the post
//! lands in `failed` and the catch-up pass stops touching it.

use std::sync::Arc;

use tracing::{debug, warn};

use grapevine_core::GrapevineError;
use grapevine_core::traits::ChatProvider;
use grapevine_core::types::{ChatMessage, ChatRequest, TaggingStatus};
use grapevine_store::Database;
use grapevine_store::queries::posts;

/// Attempts before a post is marked `failed`.
const MAX_ATTEMPTS: u32 = 3;

const TAG_PROMPT: &str = r#"Ты — классификатор постов из Telegram-каналов.
Выдели 3-7 коротких тем для поста ниже. Темы пиши в нижнем регистре,
одно-два слова каждая, без символа #.

Пост:
{post}

Ответ строго в виде JSON-массива строк, без пояснений:"#;

/// Summary of a catch-up pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TaggerReport {
    pub processed: usize,
    pub tagged: usize,
    pub failed: usize,
}

/// Tags posts through an external LLM, tracking per-post attempt state.
pub struct Tagger {
    db: Database,
    chat: Arc<dyn ChatProvider>,
}

impl Tagger {
    pub fn new(db: Database, chat: Arc<dyn ChatProvider>) -> Self {
        Self { db, chat }
    }

    /// Tag one post. Returns the resulting tagging status.
    pub async fn tag_post(&self, post_id: i64) -> Result<TaggingStatus, GrapevineError> {
        let post = posts::get(&self.db, post_id)
            .await?
            .ok_or_else(|| GrapevineError::Validation(format!("post {post_id} not found")))?;

        if post.text.trim().is_empty() {
            // Nothing to classify; leave tags NULL and close the loop.
            posts::record_tagging_failure(&self.db, post_id, 1).await?;
            return Ok(TaggingStatus::Failed);
        }

        let prompt = TAG_PROMPT.replace("{post}", &post.text);
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: 256,
            temperature: Some(0.2),
        };

        let tags = match self.chat.complete(request).await {
            Ok(response) => parse_tag_response(&response.content),
            Err(e) => {
                warn!(post_id, error = %e, "tagging LLM call failed");
                Vec::new()
            }
        };

        if tags.is_empty() {
            let status = posts::record_tagging_failure(&self.db, post_id, MAX_ATTEMPTS).await?;
            return Ok(status);
        }

        match posts::set_tags(&self.db, post_id, &tags).await {
            Ok(()) => {
                metrics::counter!("grapevine_posts_tagged_total").increment(1);
                debug!(post_id, tags = ?tags, "post tagged");
                Ok(TaggingStatus::Success)
            }
            Err(GrapevineError::Validation(reason)) => {
                warn!(post_id, reason, "LLM produced unusable tags");
                let status = posts::record_tagging_failure(&self.db, post_id, MAX_ATTEMPTS).await?;
                Ok(status)
            }
            Err(e) => Err(e),
        }
    }

    /// Retry posts left in `pending` or `retrying`, bounded by `limit`.
    pub async fn catch_up(&self, limit: usize) -> Result<TaggerReport, GrapevineError> {
        let pending = posts::pending_tagging(&self.db, limit).await?;
        let mut report = TaggerReport::default();
        for post in pending {
            report.processed += 1;
            match self.tag_post(post.id).await {
                Ok(TaggingStatus::Success) => report.tagged += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    warn!(post_id = post.id, error = %e, "tagging pass error");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Parse the LLM response into tag candidates.
///
/// Handles markdown code fences and surrounding prose; unparseable
/// responses yield an empty list rather than an error.
pub fn parse_tag_response(response: &str) -> Vec<String> {
    let trimmed = response.trim();
    let start = trimmed.find('[').unwrap_or(0);
    let end = trimmed.rfind(']').map(|i| i + 1).unwrap_or(trimmed.len());
    if start >= end {
        return Vec::new();
    }
    let json_slice = &trimmed[start..end];

    match serde_json::from_str::<Vec<String>>(json_slice) {
        Ok(tags) => tags,
        Err(e) => {
            debug!(error = %e, "unparseable tag response");
            Vec::new()
        }
    }
}
