// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optional link enrichment.
//!
//! Posts carrying a URL are sent to an external crawler that returns
//! `{success, markdown, word_count}`. The markdown lands in the post's
//! `enriched_content` and gets indexed with the body. Every failure here
//! is soft: the post simply stays unenriched.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use grapevine_core::GrapevineError;
use grapevine_store::Database;
use grapevine_store::queries::posts;

#[derive(Debug, Deserialize)]
struct CrawlResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    word_count: usize,
}

/// HTTP client for the external link-enrichment service.
pub struct LinkCrawler {
    client: reqwest::Client,
    endpoint: String,
}

impl LinkCrawler {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GrapevineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GrapevineError::Provider {
                message: format!("failed to build crawler client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/crawl", base_url.trim_end_matches('/')),
        })
    }

    /// Crawl the post's URL and persist the markdown. Warn-only on failure.
    pub async fn enrich_post(&self, db: &Database, post_id: i64) {
        let post = match posts::get(db, post_id).await {
            Ok(Some(post)) => post,
            _ => return,
        };
        let Some(url) = post.url else { return };
        if post.enriched_content.is_some() {
            return;
        }

        match self.crawl(&url).await {
            Ok(Some(markdown)) => {
                if let Err(e) = posts::set_enriched_content(db, post_id, &markdown).await {
                    warn!(post_id, error = %e, "failed to store crawled content");
                }
            }
            Ok(None) => debug!(post_id, url, "crawler returned no content"),
            Err(e) => warn!(post_id, url, error = %e, "link enrichment failed"),
        }
    }

    async fn crawl(&self, url: &str) -> Result<Option<String>, GrapevineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| GrapevineError::Transient {
                message: format!("crawler request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        if !response.status().is_success() {
            return Err(GrapevineError::transient(format!(
                "crawler returned {}",
                response.status()
            )));
        }

        let body: CrawlResponse =
            response
                .json()
                .await
                .map_err(|e| GrapevineError::Transient {
                    message: format!("unparseable crawler response: {e}"),
                    source: Some(Box::new(e)),
                })?;

        if !body.success || body.markdown.trim().is_empty() {
            return Ok(None);
        }
        debug!(words = body.word_count, "link crawled");
        Ok(Some(body.markdown))
    }
}
