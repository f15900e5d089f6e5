// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel ingestion.
//!
//! `parse_user` walks the user's active subscriptions, pulls messages
//! above the stored watermark, commits them in one batch and only then
//! advances the subscription cursor. Tagging and indexing are dispatched
//! asynchronously after the commit. `parse_all` covers every
//! authenticated user with a small jitter between them so the Telegram
//! API never sees a burst.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use grapevine_core::GrapevineError;
use grapevine_core::traits::TelegramClient;
use grapevine_core::types::ChannelInfo;
use grapevine_enrich::{Indexer, RetentionReaper, Tagger};
use grapevine_fabric::SessionRegistry;
use grapevine_store::models::{Channel, NewPost, User};
use grapevine_store::queries::{channels, posts, users};
use grapevine_store::Database;

use crate::crawler::LinkCrawler;

/// Result of one user's ingestion pass.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub posts_added: usize,
    pub channels_processed: usize,
    pub errors: Vec<String>,
}

/// Result of a full parse-all pass.
#[derive(Debug, Default)]
pub struct ParseAllReport {
    pub users_processed: usize,
    pub posts_added: usize,
    pub errors: Vec<String>,
}

/// Orchestrates ingestion across all authenticated users.
pub struct Parser {
    db: Database,
    reaper: Arc<RetentionReaper>,
    tagger: Arc<Tagger>,
    indexer: Arc<Indexer>,
    crawler: Option<Arc<LinkCrawler>>,
    max_messages_per_channel: usize,
    jitter: (Duration, Duration),
}

impl Parser {
    pub fn new(
        db: Database,
        reaper: Arc<RetentionReaper>,
        tagger: Arc<Tagger>,
        indexer: Arc<Indexer>,
        crawler: Option<Arc<LinkCrawler>>,
        max_messages_per_channel: usize,
    ) -> Self {
        Self {
            db,
            reaper,
            tagger,
            indexer,
            crawler,
            max_messages_per_channel,
            jitter: (Duration::from_millis(500), Duration::from_millis(2000)),
        }
    }

    /// Shrink the inter-user jitter (tests only).
    pub fn with_jitter(mut self, min: Duration, max: Duration) -> Self {
        self.jitter = (min, max);
        self
    }

    /// Ingest every active subscription of one user.
    ///
    /// Per-channel failures land in the report and do not abort the run;
    /// flood waits leave the channel untouched for the next cycle.
    pub async fn parse_user(
        &self,
        registry: &SessionRegistry,
        telegram_id: i64,
    ) -> Result<ParseReport, GrapevineError> {
        let started = std::time::Instant::now();
        let user = users::get_by_telegram_id(&self.db, telegram_id)
            .await?
            .ok_or_else(|| GrapevineError::Validation(format!("unknown user {telegram_id}")))?;

        let mut report = ParseReport::default();
        if !self.reaper.ingestion_allowed(&user).await? {
            warn!(telegram_id, "post quota reached, skipping ingestion");
            report.errors.push("post quota reached".to_string());
            return Ok(report);
        }

        let client = registry.get_client(telegram_id).await?;
        let subscriptions = channels::active_subscriptions(&self.db, user.id).await?;

        for (_, channel) in subscriptions {
            match self.parse_channel(client.as_ref(), &user, &channel).await {
                Ok(added) => {
                    report.posts_added += added;
                    report.channels_processed += 1;
                }
                Err(GrapevineError::RateLimited { wait }) => {
                    warn!(
                        telegram_id,
                        channel = %channel.channel_username,
                        wait_secs = wait.as_secs(),
                        "flood wait, channel retried next cycle"
                    );
                    report
                        .errors
                        .push(format!("@{}: flood wait {wait:?}", channel.channel_username));
                }
                Err(e) => {
                    warn!(
                        telegram_id,
                        channel = %channel.channel_username,
                        error = %e,
                        "channel ingestion failed"
                    );
                    report
                        .errors
                        .push(format!("@{}: {e}", channel.channel_username));
                }
            }
        }

        metrics::counter!("grapevine_posts_ingested_total").increment(report.posts_added as u64);
        metrics::histogram!("grapevine_parse_seconds").record(started.elapsed().as_secs_f64());
        info!(
            telegram_id,
            posts_added = report.posts_added,
            channels = report.channels_processed,
            errors = report.errors.len(),
            "user ingestion finished"
        );
        Ok(report)
    }

    /// Ingest every authenticated user, serially, with jitter in between.
    pub async fn parse_all(&self, registry: &SessionRegistry) -> ParseAllReport {
        let mut report = ParseAllReport::default();
        let all = match users::list_authenticated(&self.db).await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "could not list users for parse-all");
                report.errors.push(e.to_string());
                return report;
            }
        };

        for (i, user) in all.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.jitter_delay()).await;
            }
            match self.parse_user(registry, user.telegram_id).await {
                Ok(user_report) => {
                    report.users_processed += 1;
                    report.posts_added += user_report.posts_added;
                    report.errors.extend(user_report.errors);
                }
                Err(e) => {
                    warn!(telegram_id = user.telegram_id, error = %e, "user ingestion failed");
                    report
                        .errors
                        .push(format!("user {}: {e}", user.telegram_id));
                }
            }
        }
        report
    }

    async fn parse_channel(
        &self,
        client: &dyn TelegramClient,
        user: &User,
        channel: &Channel,
    ) -> Result<usize, GrapevineError> {
        let info = self.resolve_entity(client, channel).await?;
        let watermark = posts::last_message_id(&self.db, user.id, channel.id).await?;
        let messages = client
            .messages_after(&info, watermark, self.max_messages_per_channel)
            .await?;

        let batch: Vec<NewPost> = messages
            .into_iter()
            .map(|m| NewPost {
                telegram_message_id: m.message_id,
                text: m.text,
                views: m.views,
                url: m.url,
                posted_at: m.posted_at,
            })
            .collect();

        let inserted = posts::insert_batch(&self.db, user.id, channel.id, batch).await?;
        channels::advance_cursor(&self.db, user.id, channel.id, Utc::now()).await?;

        if !inserted.is_empty() {
            debug!(
                channel = %channel.channel_username,
                count = inserted.len(),
                "new posts committed, dispatching enrichment"
            );
            self.dispatch_enrichment(inserted.clone());
        }
        Ok(inserted.len())
    }

    /// Resolve the channel entity once; the id and title stick to the row
    /// so subsequent passes skip the RPC.
    async fn resolve_entity(
        &self,
        client: &dyn TelegramClient,
        channel: &Channel,
    ) -> Result<ChannelInfo, GrapevineError> {
        if let (Some(telegram_channel_id), Some(title)) =
            (channel.telegram_channel_id, &channel.title)
        {
            return Ok(ChannelInfo {
                username: channel.channel_username.clone(),
                channel_id: telegram_channel_id,
                title: title.clone(),
            });
        }
        let info = client.resolve_channel(&channel.channel_username).await?;
        channels::set_entity(&self.db, channel.id, info.channel_id, &info.title).await?;
        Ok(info)
    }

    /// Tagging and indexing run concurrently after the commit; they write
    /// disjoint columns, so their order does not matter.
    fn dispatch_enrichment(&self, post_ids: Vec<i64>) {
        let tagger = Arc::clone(&self.tagger);
        let tag_ids = post_ids.clone();
        tokio::spawn(async move {
            for post_id in tag_ids {
                if let Err(e) = tagger.tag_post(post_id).await {
                    warn!(post_id, error = %e, "tagging dispatch failed");
                }
            }
        });

        let indexer = Arc::clone(&self.indexer);
        let crawler = self.crawler.clone();
        let db = self.db.clone();
        tokio::spawn(async move {
            if let Some(crawler) = crawler {
                for &post_id in &post_ids {
                    crawler.enrich_post(&db, post_id).await;
                }
            }
            let batch = indexer.index_batch(&post_ids).await;
            if batch.failed > 0 {
                warn!(
                    failed = batch.failed,
                    errors = ?batch.errors,
                    "indexing dispatch had failures"
                );
            }
        });
    }

    fn jitter_delay(&self) -> Duration {
        let (min, max) = self.jitter;
        if max <= min {
            return min;
        }
        let span = (max - min).as_millis() as u64;
        min + Duration::from_millis(rand::thread_rng().gen_range(0..=span))
    }
}
