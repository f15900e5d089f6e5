// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Digest generation.
//!
//! Fetches the user's posts for a window, groups them by channel, renders
//! the configured format and hands the result to the delivery surface
//! with a bounded retry. With `ai_summarize` on, the user's topics (their
//! stated preferences plus terms inferred from query history) each get a
//! short LLM summary on top.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use grapevine_core::GrapevineError;
use grapevine_core::traits::{ChatProvider, DeliverySurface};
use grapevine_core::types::{ChatMessage, ChatRequest, NoticeKind, OutboundNotice, RenderFormat};
use grapevine_store::Database;
use grapevine_store::models::{DigestSettings, Post, User};
use grapevine_store::queries::{channels, digests, history, posts};

use crate::engine::{RetrievalEngine, SearchFilters};

/// Delivery attempts before the digest is given up for this slot.
const DELIVERY_ATTEMPTS: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Upper bound on AI-summarized topics per digest.
const MAX_TOPICS: usize = 5;
/// How many history entries feed topic inference.
const HISTORY_SAMPLE: usize = 50;

const TOPIC_PROMPT: &str = r#"Сделай краткую сводку по теме «{topic}» на основе постов ниже.
Стиль: {style}. 2-4 предложения, на русском, без вступлений.

Посты:
{posts}"#;

/// What one digest run produced.
#[derive(Debug, PartialEq, Eq)]
pub struct DigestOutcome {
    pub delivered: bool,
    pub posts_included: usize,
}

/// Renders and delivers per-user digests.
pub struct DigestGenerator {
    db: Database,
    engine: Arc<RetrievalEngine>,
    chat: Arc<dyn ChatProvider>,
    delivery: Arc<dyn DeliverySurface>,
    backoff_base: Duration,
}

impl DigestGenerator {
    pub fn new(
        db: Database,
        engine: Arc<RetrievalEngine>,
        chat: Arc<dyn ChatProvider>,
        delivery: Arc<dyn DeliverySurface>,
    ) -> Self {
        Self {
            db,
            engine,
            chat,
            delivery,
            backoff_base: Duration::from_secs(2),
        }
    }

    /// Shrink the delivery backoff (tests only).
    pub fn with_fast_backoff(mut self) -> Self {
        self.backoff_base = Duration::from_millis(10);
        self
    }

    /// Build and deliver the digest for `[from, to]`.
    ///
    /// An empty window is skipped quietly. Delivery is retried with
    /// exponential backoff; exhausting the attempts surfaces the error so
    /// the scheduler can log and move on — the next slot runs normally.
    pub async fn run_for_user(
        &self,
        user: &User,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DigestOutcome, GrapevineError> {
        let settings = digests::get_or_default(&self.db, user.id).await?;
        if !settings.enabled {
            return Ok(DigestOutcome {
                delivered: false,
                posts_included: 0,
            });
        }

        let mut window = posts::in_window(
            &self.db,
            user.id,
            from,
            to,
            settings.channels.clone(),
            settings.max_posts * 4,
        )
        .await?;
        if let Some(topics) = &settings.topics {
            if !topics.is_empty() {
                window.retain(|post| {
                    post.tags
                        .as_ref()
                        .is_some_and(|tags| tags.iter().any(|t| topics.contains(t)))
                });
            }
        }
        window.truncate(settings.max_posts);

        if window.is_empty() {
            debug!(user_id = user.id, "no posts in the digest window, skipping");
            return Ok(DigestOutcome {
                delivered: false,
                posts_included: 0,
            });
        }

        let summaries = if settings.ai_summarize {
            self.topic_summaries(user, &settings).await
        } else {
            Vec::new()
        };

        let body = self.render(&settings, &window, &summaries, from, to).await?;
        let notice = OutboundNotice {
            telegram_id: user.telegram_id,
            kind: NoticeKind::Digest,
            format: settings.format,
            body,
        };

        self.deliver_with_retry(notice).await?;
        digests::mark_sent(&self.db, user.id, Utc::now(), None).await?;
        metrics::counter!("grapevine_digests_sent_total").increment(1);
        info!(
            user_id = user.id,
            posts = window.len(),
            topics = summaries.len(),
            "digest delivered"
        );
        Ok(DigestOutcome {
            delivered: true,
            posts_included: window.len(),
        })
    }

    /// Per-topic retrieval + summary. Topic failures drop that topic only.
    async fn topic_summaries(
        &self,
        user: &User,
        settings: &DigestSettings,
    ) -> Vec<(String, String)> {
        let mut topics = settings.preferred_topics.clone();
        for inferred in self.inferred_topics(user.id).await {
            if !topics.contains(&inferred) {
                topics.push(inferred);
            }
        }
        topics.truncate(MAX_TOPICS);

        let mut summaries = Vec::new();
        for topic in topics {
            let hits = match self
                .engine
                .search(&topic, user, 3, &SearchFilters::default())
                .await
            {
                Ok(hits) if !hits.is_empty() => hits,
                Ok(_) => continue,
                Err(e) => {
                    warn!(topic, error = %e, "topic retrieval failed");
                    continue;
                }
            };

            let post_block = hits
                .iter()
                .map(|h| format!("- {}", h.text))
                .collect::<Vec<_>>()
                .join("\n");
            let request = ChatRequest {
                messages: vec![ChatMessage::user(
                    TOPIC_PROMPT
                        .replace("{topic}", &topic)
                        .replace("{style}", &settings.summary_style)
                        .replace("{posts}", &post_block),
                )],
                max_tokens: 512,
                temperature: Some(0.4),
            };
            match self.chat.complete(request).await {
                Ok(response) => summaries.push((topic, response.content)),
                Err(e) => warn!(topic, error = %e, "topic summary failed"),
            }
        }
        summaries
    }

    /// Most frequent meaningful words from the user's recent questions.
    async fn inferred_topics(&self, user_id: i64) -> Vec<String> {
        let recent = match history::recent(&self.db, user_id, HISTORY_SAMPLE).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!(user_id, error = %e, "query history unavailable for topic inference");
                return Vec::new();
            }
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (query, _) in recent {
            for word in query.split_whitespace() {
                let word: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                if word.chars().count() > 3 {
                    *counts.entry(word).or_default() += 1;
                }
            }
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(3).map(|(word, _)| word).collect()
    }

    async fn render(
        &self,
        settings: &DigestSettings,
        window: &[Post],
        summaries: &[(String, String)],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<String, GrapevineError> {
        // Group by channel, preserving the newest-first order inside each.
        let mut grouped: BTreeMap<String, Vec<&Post>> = BTreeMap::new();
        for post in window {
            let username = channels::get_by_id(&self.db, post.channel_id)
                .await?
                .map(|c| c.channel_username)
                .unwrap_or_else(|| "unknown".to_string());
            grouped.entry(username).or_default().push(post);
        }

        let title = format!(
            "Дайджест {} — {}",
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );
        let body = match settings.format {
            RenderFormat::Markdown => render_markdown(&title, &grouped, summaries),
            RenderFormat::Html => render_html(&title, &grouped, summaries),
            RenderFormat::Plain => render_plain(&title, &grouped, summaries),
        };
        Ok(body)
    }

    async fn deliver_with_retry(&self, notice: OutboundNotice) -> Result<(), GrapevineError> {
        let mut last_err = None;
        for attempt in 0..DELIVERY_ATTEMPTS {
            if attempt > 0 {
                let factor = 1u32 << attempt.min(4);
                tokio::time::sleep((self.backoff_base * factor).min(MAX_BACKOFF)).await;
            }
            match self.delivery.deliver(notice.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "digest delivery attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| GrapevineError::Internal("delivery failed without error".into())))
    }
}

fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(200).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

fn render_markdown(
    title: &str,
    grouped: &BTreeMap<String, Vec<&Post>>,
    summaries: &[(String, String)],
) -> String {
    let mut out = format!("# {title}\n");
    if !summaries.is_empty() {
        out.push_str("\n## Главное по темам\n");
        for (topic, summary) in summaries {
            out.push_str(&format!("\n**{topic}**: {summary}\n"));
        }
    }
    for (channel, posts) in grouped {
        out.push_str(&format!("\n## @{channel}\n"));
        for post in posts {
            let line = match &post.url {
                Some(url) => format!(
                    "- {} [{}]({url})\n",
                    snippet(&post.text),
                    post.posted_at.format("%d.%m")
                ),
                None => format!(
                    "- {} ({})\n",
                    snippet(&post.text),
                    post.posted_at.format("%d.%m")
                ),
            };
            out.push_str(&line);
        }
    }
    out
}

fn render_html(
    title: &str,
    grouped: &BTreeMap<String, Vec<&Post>>,
    summaries: &[(String, String)],
) -> String {
    let mut out = format!("<h1>{title}</h1>");
    if !summaries.is_empty() {
        out.push_str("<h2>Главное по темам</h2>");
        for (topic, summary) in summaries {
            out.push_str(&format!("<p><b>{topic}</b>: {summary}</p>"));
        }
    }
    for (channel, posts) in grouped {
        out.push_str(&format!("<h2>@{channel}</h2><ul>"));
        for post in posts {
            match &post.url {
                Some(url) => out.push_str(&format!(
                    "<li><a href=\"{url}\">{}</a> ({})</li>",
                    snippet(&post.text),
                    post.posted_at.format("%d.%m")
                )),
                None => out.push_str(&format!(
                    "<li>{} ({})</li>",
                    snippet(&post.text),
                    post.posted_at.format("%d.%m")
                )),
            }
        }
        out.push_str("</ul>");
    }
    out
}

fn render_plain(
    title: &str,
    grouped: &BTreeMap<String, Vec<&Post>>,
    summaries: &[(String, String)],
) -> String {
    let mut out = format!("{title}\n");
    if !summaries.is_empty() {
        out.push('\n');
        for (topic, summary) in summaries {
            out.push_str(&format!("{topic}: {summary}\n"));
        }
    }
    for (channel, posts) in grouped {
        out.push_str(&format!("\n@{channel}\n"));
        for post in posts {
            out.push_str(&format!(
                "  {} ({})\n",
                snippet(&post.text),
                post.posted_at.format("%d.%m")
            ));
        }
    }
    out
}
