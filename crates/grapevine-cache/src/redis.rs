// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Redis-backed cache using a deadpool connection pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use grapevine_core::traits::Cache;
use grapevine_core::GrapevineError;

fn cache_err(message: impl std::fmt::Display) -> GrapevineError {
    GrapevineError::Cache {
        message: message.to_string(),
    }
}

/// TTL key/value cache over a managed redis pool.
///
/// Other processes (auth server, bot) write to the same instance; readers
/// must tolerate stale values, TTLs are the source of truth.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisCache {
    /// Create a cache from a redis URL (`redis://[:password@]host:port`).
    pub fn new(url: &str, max_connections: usize) -> Result<Self, GrapevineError> {
        let cfg = Config::from_url(url);
        let pool = cfg
            .builder()
            .map_err(cache_err)?
            .max_size(max_connections)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(cache_err)?;

        // Redact credentials from the URL before logging.
        let safe_url = url.split('@').next_back().unwrap_or(url);
        tracing::info!(url = %safe_url, max_connections, "redis cache pool created");

        Ok(Self { pool })
    }

    /// Ping the backend; used by the gateway health endpoint.
    pub async fn health_check(&self) -> Result<(), GrapevineError> {
        let mut conn = self.pool.get().await.map_err(cache_err)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(())
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>, GrapevineError> {
        let mut conn = self.pool.get().await.map_err(cache_err)?;
        let raw: Option<String> = conn.get(key).await.map_err(cache_err)?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(cache_err)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), GrapevineError> {
        let mut conn = self.pool.get().await.map_err(cache_err)?;
        let serialized = serde_json::to_string(value).map_err(cache_err)?;
        conn.set_ex::<_, _, ()>(key, serialized, ttl.as_secs())
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, GrapevineError> {
        let mut conn = self.pool.get().await.map_err(cache_err)?;
        let deleted: i32 = conn.del(key).await.map_err(cache_err)?;
        Ok(deleted > 0)
    }
}
