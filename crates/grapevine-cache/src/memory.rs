// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory TTL cache for tests and single-process deployments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use grapevine_core::traits::Cache;
use grapevine_core::GrapevineError;

/// Process-local cache with the same TTL semantics as the redis backend.
///
/// Expired entries are dropped lazily on read and opportunistically on
/// write, so the map stays bounded under churn.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (serde_json::Value, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, GrapevineError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, deadline)) if *deadline > now => return Ok(Some(value.clone())),
                None => return Ok(None),
                _ => {}
            }
        }
        // Entry exists but expired; drop it.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set_json(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), GrapevineError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, deadline)| *deadline > now);
        entries.insert(key.to_string(), (value.clone(), now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, GrapevineError> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(matches!(removed, Some((_, deadline)) if deadline > now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set_json("qr_session:abc", &json!({"status": "pending"}), Duration::from_secs(600))
            .await
            .unwrap();

        let value = cache.get_json("qr_session:abc").await.unwrap().unwrap();
        assert_eq!(value["status"], "pending");
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache = MemoryCache::new();
        assert!(cache.get_json("nope").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .set_json("k", &json!(1), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get_json("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get_json("k").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn delete_reports_liveness() {
        let cache = MemoryCache::new();
        cache
            .set_json("k", &json!(1), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_resets_ttl() {
        let cache = MemoryCache::new();
        cache
            .set_json("k", &json!("old"), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        cache
            .set_json("k", &json!("new"), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        let value = cache.get_json("k").await.unwrap().unwrap();
        assert_eq!(value, json!("new"));
    }
}
