// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retention reaper: per-user deletion of expired posts together with
//! their vector points and graph nodes, plus orphan channel cleanup.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use grapevine_core::GrapevineError;
use grapevine_core::traits::{GraphStore, VectorIndex};
use grapevine_store::models::User;
use grapevine_store::queries::{channels, digests, posts, users};
use grapevine_store::Database;

/// Hard floor on effective retention, in days.
const RETENTION_FLOOR_DAYS: u32 = 90;
/// Hard ceiling on effective retention, in days.
const RETENTION_CAP_DAYS: u32 = 3650;

/// Result of a cleanup pass.
#[derive(Debug, PartialEq, Eq)]
pub struct CleanupReport {
    pub posts_deleted: usize,
    pub retention_days: u32,
    pub dry_run: bool,
}

/// Deletes expired data and answers ingestion quota questions.
pub struct RetentionReaper {
    db: Database,
    vectors: Arc<dyn VectorIndex>,
    graph: Option<Arc<dyn GraphStore>>,
}

impl RetentionReaper {
    pub fn new(
        db: Database,
        vectors: Arc<dyn VectorIndex>,
        graph: Option<Arc<dyn GraphStore>>,
    ) -> Self {
        Self { db, vectors, graph }
    }

    /// Effective retention: never below the floor, never below two digest
    /// periods, capped at ten years.
    pub async fn effective_retention_days(&self, user: &User) -> Result<u32, GrapevineError> {
        let settings = digests::get_or_default(&self.db, user.id).await?;
        let digest_floor = settings.frequency.period_days() * 2;
        let days = RETENTION_FLOOR_DAYS
            .max(digest_floor)
            .max(user.retention_days)
            .min(RETENTION_CAP_DAYS);
        Ok(days)
    }

    /// Delete a user's posts older than their effective retention, along
    /// with vector points and graph nodes, then reap orphaned channels.
    pub async fn cleanup_user(
        &self,
        user_id: i64,
        dry_run: bool,
    ) -> Result<CleanupReport, GrapevineError> {
        let user = users::get_by_id(&self.db, user_id)
            .await?
            .ok_or_else(|| GrapevineError::Validation(format!("user {user_id} not found")))?;

        let retention_days = self.effective_retention_days(&user).await?;
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let expired = posts::older_than(&self.db, user_id, cutoff).await?;

        if dry_run {
            return Ok(CleanupReport {
                posts_deleted: expired.len(),
                retention_days,
                dry_run: true,
            });
        }

        if !expired.is_empty() {
            // Vectors first: losing a row before its points would strand
            // them with no way to find them again.
            self.vectors.delete_by_posts(user_id, &expired).await?;
            if let Some(graph) = &self.graph {
                if let Err(e) = graph.delete_posts(&expired).await {
                    warn!(user_id, error = %e, "graph cleanup dropped");
                }
            }
            posts::delete_many(&self.db, expired.clone()).await?;
        }

        let orphans = channels::orphaned(&self.db).await?;
        if !orphans.is_empty() {
            let removed = channels::delete_many(&self.db, orphans).await?;
            info!(removed, "reaped orphaned channels");
        }

        info!(
            user_id,
            posts_deleted = expired.len(),
            retention_days,
            "retention cleanup finished"
        );
        Ok(CleanupReport {
            posts_deleted: expired.len(),
            retention_days,
            dry_run: false,
        })
    }

    /// Run cleanup for every user; per-user failures do not abort the pass.
    pub async fn cleanup_all(&self) -> Result<usize, GrapevineError> {
        let mut total = 0;
        for user in users::list_all(&self.db).await? {
            match self.cleanup_user(user.id, false).await {
                Ok(report) => total += report.posts_deleted,
                Err(e) => warn!(user_id = user.id, error = %e, "cleanup failed for user"),
            }
        }
        Ok(total)
    }

    /// Ingestion hard-cap consulted by the parser before committing.
    pub async fn ingestion_allowed(&self, user: &User) -> Result<bool, GrapevineError> {
        let count = posts::count_for_user(&self.db, user.id).await?;
        Ok(count < max_posts_for_tier(user))
    }
}

/// Per-tier ceiling on stored posts.
fn max_posts_for_tier(user: &User) -> usize {
    use grapevine_core::types::SubscriptionTier::*;
    match user.tier {
        Free => 5_000,
        Trial => 10_000,
        Basic => 50_000,
        Premium => 200_000,
        Enterprise => 1_000_000,
    }
}
