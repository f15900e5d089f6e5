// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Grapevine scheduler.
//!
//! One cooperative scheduler drives four trigger families: the parse-all
//! interval (with per-user jitter inside the parser), the daily retention
//! cleanup at a configured local time, the two-hourly tagger/indexer
//! catch-up, and per-user digest crons evaluated in each user's own
//! timezone with a stagger so digests never hit the LLM in one burst.
//! Telegram-bound work is submitted through the fabric handle; everything
//! else runs on the scheduler's own runtime.

pub mod schedule;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use grapevine_enrich::{Indexer, RetentionReaper, Tagger};
use grapevine_fabric::FabricHandle;
use grapevine_ingest::Parser;
use grapevine_retrieval::DigestGenerator;
use grapevine_store::Database;
use grapevine_store::queries::{digests, users};

use crate::schedule::{digest_window, next_digest_occurrence, next_local_time, stagger_minutes};

/// How long shutdown waits for in-flight jobs.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Trigger cadences. Defaults match the production configuration; tests
/// shrink them.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Gap between parse-all passes.
    pub parse_interval: Duration,
    /// Local `(hour, minute)` of the daily retention cleanup.
    pub cleanup_time: (u32, u32),
    /// Timezone the cleanup time is expressed in.
    pub timezone: Tz,
    /// Gap between tagger/indexer catch-up passes.
    pub catchup_interval: Duration,
    /// Batch bound for each catch-up pass.
    pub catchup_limit: usize,
    /// How often due digests are checked.
    pub digest_poll: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parse_interval: Duration::from_secs(30 * 60),
            cleanup_time: (3, 30),
            timezone: chrono_tz::UTC,
            catchup_interval: Duration::from_secs(2 * 3600),
            catchup_limit: 50,
            digest_poll: Duration::from_secs(60),
        }
    }
}

/// Drives all recurring Grapevine work until cancelled.
pub struct Scheduler {
    db: Database,
    fabric: FabricHandle,
    parser: Arc<Parser>,
    reaper: Arc<RetentionReaper>,
    tagger: Arc<Tagger>,
    indexer: Arc<Indexer>,
    digests: Arc<DigestGenerator>,
    config: SchedulerConfig,
    token: CancellationToken,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        fabric: FabricHandle,
        parser: Arc<Parser>,
        reaper: Arc<RetentionReaper>,
        tagger: Arc<Tagger>,
        indexer: Arc<Indexer>,
        digests: Arc<DigestGenerator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            fabric,
            parser,
            reaper,
            tagger,
            indexer,
            digests,
            config,
            token: CancellationToken::new(),
        }
    }

    /// Token shared with the serve loop; cancelling it stops every trigger.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run all trigger loops until the token is cancelled.
    pub async fn run(self: Arc<Self>) {
        info!(
            parse_interval_secs = self.config.parse_interval.as_secs(),
            cleanup = format!("{:02}:{:02}", self.config.cleanup_time.0, self.config.cleanup_time.1),
            timezone = %self.config.timezone,
            "scheduler started"
        );
        tokio::join!(
            Arc::clone(&self).parse_loop(),
            Arc::clone(&self).cleanup_loop(),
            Arc::clone(&self).catchup_loop(),
            Arc::clone(&self).digest_loop(),
        );
        info!("scheduler stopped");
    }

    async fn parse_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.config.parse_interval) => {}
            }
            let parser = Arc::clone(&self.parser);
            let result = self
                .fabric
                .submit(move |ctx| async move { parser.parse_all(&ctx.registry).await })
                .await;
            match result {
                Ok(report) => debug!(
                    users = report.users_processed,
                    posts = report.posts_added,
                    errors = report.errors.len(),
                    "scheduled parse-all finished"
                ),
                Err(e) => warn!(error = %e, "scheduled parse-all failed"),
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        loop {
            let (hour, minute) = self.config.cleanup_time;
            let next = next_local_time(Utc::now(), self.config.timezone, hour, minute);
            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_secs(60));
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            match self.reaper.cleanup_all().await {
                Ok(deleted) => info!(deleted, "scheduled retention cleanup finished"),
                Err(e) => warn!(error = %e, "scheduled retention cleanup failed"),
            }
        }
    }

    async fn catchup_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.config.catchup_interval) => {}
            }
            match self.tagger.catch_up(self.config.catchup_limit).await {
                Ok(report) if report.processed > 0 => {
                    debug!(tagged = report.tagged, failed = report.failed, "tagging catch-up")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "tagging catch-up failed"),
            }
            match self.indexer.catch_up(self.config.catchup_limit).await {
                Ok(report) if report.total > 0 => {
                    debug!(success = report.success, failed = report.failed, "indexing catch-up")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "indexing catch-up failed"),
            }
        }
    }

    async fn digest_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.config.digest_poll) => {}
            }
            self.run_due_digests().await;
        }
    }

    /// One pass over enabled digest settings: schedule the unscheduled,
    /// deliver the due, reschedule afterwards. Public so the control
    /// surface can force a pass.
    pub async fn run_due_digests(&self) -> usize {
        let enabled = match digests::list_enabled(&self.db).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(error = %e, "could not list digest settings");
                return 0;
            }
        };

        let now = Utc::now();
        let mut sent = 0;
        for (position, settings) in enabled.iter().enumerate() {
            if self.token.is_cancelled() {
                break;
            }
            let stagger = stagger_minutes(position);

            let due = match settings.next_scheduled_at {
                Some(next) => next <= now,
                None => {
                    // First sighting: schedule, don't send.
                    match next_digest_occurrence(settings, stagger, now) {
                        Ok(next) => {
                            if let Err(e) =
                                digests::set_next_scheduled(&self.db, settings.user_id, next)
                                    .await
                            {
                                warn!(user_id = settings.user_id, error = %e,
                                      "could not schedule digest");
                            }
                        }
                        Err(e) => warn!(user_id = settings.user_id, error = %e,
                                        "bad digest schedule"),
                    }
                    continue;
                }
            };
            if !due {
                continue;
            }

            let user = match users::get_by_id(&self.db, settings.user_id).await {
                Ok(Some(user)) => user,
                _ => continue,
            };
            let (from, to) = digest_window(settings, now);
            match self.digests.run_for_user(&user, from, to).await {
                Ok(outcome) if outcome.delivered => sent += 1,
                Ok(_) => debug!(user_id = user.id, "digest window empty, skipped"),
                Err(e) => {
                    // Logged and skipped; the next slot runs normally.
                    warn!(user_id = user.id, error = %e, "digest delivery failed");
                }
            }
            match next_digest_occurrence(settings, stagger, now) {
                Ok(next) => {
                    if let Err(e) =
                        digests::mark_sent(&self.db, settings.user_id, now, Some(next)).await
                    {
                        warn!(user_id = settings.user_id, error = %e,
                              "could not reschedule digest");
                    }
                }
                Err(e) => warn!(user_id = settings.user_id, error = %e, "bad digest schedule"),
            }
        }
        sent
    }

    /// Cancel all triggers and wait for in-flight work, bounded by the
    /// grace period.
    pub async fn shutdown(self: Arc<Self>, join: tokio::task::JoinHandle<()>) {
        self.token.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, join).await.is_err() {
            warn!("scheduler shutdown grace expired");
        }
    }
}
