// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cache-backed graph rollups.
//!
//! Interest and trending rollups are expensive graph scans that feed every
//! hybrid search, so they are memoized in the shared TTL cache. Cache
//! failures are soft: the wrapped store is always the fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use grapevine_core::GrapevineError;
use grapevine_core::traits::cache::{interests_key, post_context_key, trending_key};
use grapevine_core::traits::{Cache, GraphStore};
use grapevine_core::types::{GraphExpansion, GraphPost, PostGraphContext, TagCount};

const INTERESTS_TTL: Duration = Duration::from_secs(3600);
const TRENDING_TTL: Duration = Duration::from_secs(21600);
const POST_CONTEXT_TTL: Duration = Duration::from_secs(86400);

/// A [`GraphStore`] decorator that memoizes rollup reads in the shared cache.
pub struct CachedGraph {
    inner: Arc<dyn GraphStore>,
    cache: Arc<dyn Cache>,
}

impl CachedGraph {
    pub fn new(inner: Arc<dyn GraphStore>, cache: Arc<dyn Cache>) -> Self {
        Self { inner, cache }
    }

    async fn cached_get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get_json(key).await {
            Ok(Some(value)) => serde_json::from_value(value).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(key, error = %e, "cache read failed, going to graph");
                None
            }
        }
    }

    async fn cached_put<T: serde::Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(json) = serde_json::to_value(value) {
            if let Err(e) = self.cache.set_json(key, &json, ttl).await {
                debug!(key, error = %e, "cache write failed");
            }
        }
    }
}

#[async_trait]
impl GraphStore for CachedGraph {
    async fn upsert_post(&self, post: &GraphPost) -> Result<(), GrapevineError> {
        // Writes invalidate the writer's interest rollup.
        self.inner.upsert_post(post).await?;
        let _ = self.cache.delete(&interests_key(post.telegram_id)).await;
        Ok(())
    }

    async fn user_interests(
        &self,
        telegram_id: i64,
        limit: usize,
    ) -> Result<Vec<TagCount>, GrapevineError> {
        let key = interests_key(telegram_id);
        if let Some(cached) = self.cached_get::<Vec<TagCount>>(&key).await {
            if cached.len() >= limit {
                return Ok(cached.into_iter().take(limit).collect());
            }
        }
        let interests = self.inner.user_interests(telegram_id, limit).await?;
        self.cached_put(&key, &interests, INTERESTS_TTL).await;
        Ok(interests)
    }

    async fn trending_tags(
        &self,
        days: u32,
        limit: usize,
    ) -> Result<Vec<TagCount>, GrapevineError> {
        let key = trending_key(days);
        if let Some(cached) = self.cached_get::<Vec<TagCount>>(&key).await {
            if cached.len() >= limit {
                return Ok(cached.into_iter().take(limit).collect());
            }
        }
        let trending = self.inner.trending_tags(days, limit).await?;
        self.cached_put(&key, &trending, TRENDING_TTL).await;
        Ok(trending)
    }

    async fn expand_posts(
        &self,
        post_ids: &[i64],
        limit_per_post: usize,
    ) -> Result<Vec<GraphExpansion>, GrapevineError> {
        // Expansion inputs vary per query; not worth memoizing.
        self.inner.expand_posts(post_ids, limit_per_post).await
    }

    async fn post_context(
        &self,
        post_id: i64,
    ) -> Result<Option<PostGraphContext>, GrapevineError> {
        let key = post_context_key(post_id);
        if let Some(cached) = self.cached_get::<PostGraphContext>(&key).await {
            return Ok(Some(cached));
        }
        let context = self.inner.post_context(post_id).await?;
        if let Some(context) = &context {
            self.cached_put(&key, context, POST_CONTEXT_TTL).await;
        }
        Ok(context)
    }

    async fn delete_posts(&self, post_ids: &[i64]) -> Result<(), GrapevineError> {
        self.inner.delete_posts(post_ids).await?;
        for post_id in post_ids {
            let _ = self.cache.delete(&post_context_key(*post_id)).await;
        }
        Ok(())
    }

    async fn delete_user(&self, telegram_id: i64) -> Result<(), GrapevineError> {
        self.inner.delete_user(telegram_id).await?;
        let _ = self.cache.delete(&interests_key(telegram_id)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapevine_cache::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how many reads reach the underlying graph.
    #[derive(Default)]
    struct CountingGraph {
        interest_calls: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for CountingGraph {
        async fn upsert_post(&self, _post: &GraphPost) -> Result<(), GrapevineError> {
            Ok(())
        }

        async fn user_interests(
            &self,
            _telegram_id: i64,
            limit: usize,
        ) -> Result<Vec<TagCount>, GrapevineError> {
            self.interest_calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..limit as i64)
                .map(|i| TagCount {
                    tag: format!("tag{i}"),
                    posts_count: 10 - i,
                })
                .collect())
        }

        async fn trending_tags(
            &self,
            _days: u32,
            _limit: usize,
        ) -> Result<Vec<TagCount>, GrapevineError> {
            Ok(vec![])
        }

        async fn expand_posts(
            &self,
            _post_ids: &[i64],
            _limit_per_post: usize,
        ) -> Result<Vec<GraphExpansion>, GrapevineError> {
            Ok(vec![])
        }

        async fn post_context(
            &self,
            _post_id: i64,
        ) -> Result<Option<PostGraphContext>, GrapevineError> {
            Ok(None)
        }

        async fn delete_posts(&self, _post_ids: &[i64]) -> Result<(), GrapevineError> {
            Ok(())
        }

        async fn delete_user(&self, _telegram_id: i64) -> Result<(), GrapevineError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn interests_hit_cache_on_second_read() {
        let inner = Arc::new(CountingGraph::default());
        let cached = CachedGraph::new(inner.clone(), Arc::new(MemoryCache::new()));

        let first = cached.user_interests(1, 5).await.unwrap();
        let second = cached.user_interests(1, 5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.interest_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upsert_invalidates_interest_rollup() {
        let inner = Arc::new(CountingGraph::default());
        let cached = CachedGraph::new(inner.clone(), Arc::new(MemoryCache::new()));

        cached.user_interests(1, 5).await.unwrap();
        cached
            .upsert_post(&GraphPost {
                post_id: 1,
                telegram_id: 1,
                channel_id: 10,
                channel_username: "c".into(),
                posted_at: chrono::Utc::now(),
                tags: vec!["ai".into()],
            })
            .await
            .unwrap();
        cached.user_interests(1, 5).await.unwrap();
        assert_eq!(inner.interest_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn larger_limit_bypasses_smaller_cached_rollup() {
        let inner = Arc::new(CountingGraph::default());
        let cached = CachedGraph::new(inner.clone(), Arc::new(MemoryCache::new()));

        cached.user_interests(1, 3).await.unwrap();
        let bigger = cached.user_interests(1, 5).await.unwrap();
        assert_eq!(bigger.len(), 5);
        assert_eq!(inner.interest_calls.load(Ordering::SeqCst), 2);
    }
}
