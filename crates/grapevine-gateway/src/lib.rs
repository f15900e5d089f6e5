// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP control surface for Grapevine.
//!
//! JSON REST endpoints for bot and admin clients: user and channel state,
//! post listings, on-demand ingestion triggers, health and Prometheus
//! metrics. Ingestion triggers are proxied to the ingestion loop through
//! the fabric handle.

pub mod handlers;
pub mod server;

pub use server::{install_metrics, router, start_server, GatewayState, ServerConfig};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use grapevine_cache::MemoryCache;
    use grapevine_core::types::{AuthStatus, ChannelMessage, TelegramCredentials};
    use grapevine_embeddings::EmbeddingService;
    use grapevine_enrich::{Indexer, RetentionReaper, Tagger};
    use grapevine_fabric::{Fabric, FabricSeed};
    use grapevine_ingest::Parser;
    use grapevine_store::queries::{channels, users};
    use grapevine_store::Database;
    use grapevine_test_utils::{MockChat, MockEmbedder, MockTelegram};
    use grapevine_vault::Vault;
    use grapevine_vector::MemoryIndex;

    use crate::server::{router, GatewayState};

    struct Harness {
        base: String,
        db: Database,
        telegram: MockTelegram,
        fabric: Fabric,
        client: reqwest::Client,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let telegram = MockTelegram::new();

        let user = users::upsert(&db, 20000001, Some("alice"), None).await.unwrap();
        users::set_auth_status(&db, 20000001, AuthStatus::Authenticated)
            .await
            .unwrap();
        telegram.authorize(20000001);
        let channel = channels::get_or_create(&db, "ai_news").await.unwrap();
        channels::subscribe(&db, user.id, channel.id).await.unwrap();
        telegram.add_channel("ai_news", 100, "AI News");

        let fabric = Fabric::spawn(FabricSeed {
            connector: Arc::new(telegram.clone()),
            db: db.clone(),
            vault: Arc::new(Vault::from_key_string(&"ab".repeat(32)).unwrap()),
            cache: Arc::new(MemoryCache::new()),
            sessions_dir: dir.path().to_path_buf(),
            master_credentials: Some(TelegramCredentials {
                api_id: 1,
                api_hash: "hash".to_string(),
                phone: None,
            }),
        })
        .unwrap();

        let index = Arc::new(MemoryIndex::new());
        let embeddings = Arc::new(EmbeddingService::new(
            Arc::new(MockEmbedder::primary()),
            None,
            None,
        ));
        let tagger = Arc::new(Tagger::new(db.clone(), Arc::new(MockChat::new())));
        let indexer = Arc::new(Indexer::new(db.clone(), index.clone(), None, embeddings));
        let reaper = Arc::new(RetentionReaper::new(db.clone(), index, None));
        let parser = Arc::new(
            Parser::new(db.clone(), reaper, tagger, indexer, None, 200)
                .with_jitter(Duration::from_millis(1), Duration::from_millis(2)),
        );

        let state = GatewayState {
            db: db.clone(),
            fabric: fabric.handle(),
            parser,
            timezone: chrono_tz::Europe::Moscow,
            start_time: Instant::now(),
            prometheus: None,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Harness {
            base,
            db,
            telegram,
            fabric,
            client: reqwest::Client::new(),
            _dir: dir,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn health_reports_ok() {
        let h = harness().await;
        let body: serde_json::Value = h
            .client
            .get(format!("{}/health", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());
        h.fabric.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn users_listing_renders_local_timezone() {
        let h = harness().await;
        let body: serde_json::Value = h
            .client
            .get(format!("{}/users", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let user = &body.as_array().unwrap()[0];
        assert_eq!(user["telegram_id"], 20000001);
        assert_eq!(user["auth_status"], "authenticated");
        // Moscow is UTC+3 year-round.
        assert!(user["created_at"].as_str().unwrap().ends_with("+03:00"));
        h.fabric.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parse_endpoint_runs_on_the_ingestion_loop() {
        let h = harness().await;
        h.telegram.add_channel_messages(
            100,
            vec![ChannelMessage {
                message_id: 1,
                text: "пост".to_string(),
                views: Some(5),
                url: None,
                posted_at: Utc::now(),
            }],
        );

        let response = h
            .client
            .post(format!("{}/users/20000001/channels/parse", h.base))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["posts_added"], 1);
        assert_eq!(body["channels_processed"], 1);

        // Every Telegram RPC this triggered ran on the fabric thread.
        let fabric_thread = h.fabric.handle().thread_id();
        let rpc_threads = h.telegram.rpc_threads();
        assert!(!rpc_threads.is_empty());
        assert!(rpc_threads.iter().all(|t| *t == fabric_thread));

        let posts: serde_json::Value = h
            .client
            .get(format!("{}/users/20000001/posts?hours_back=24&limit=10", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(posts.as_array().unwrap().len(), 1);
        assert_eq!(posts[0]["text"], "пост");
        h.fabric.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parse_all_endpoint_reports_coverage() {
        let h = harness().await;
        let body: serde_json::Value = h
            .client
            .post(format!("{}/parse_all_channels", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["users_processed"], 1);
        assert_eq!(body["posts_added"], 0);
        h.fabric.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn channels_listing_shows_subscription_state() {
        let h = harness().await;
        let body: serde_json::Value = h
            .client
            .get(format!("{}/users/20000001/channels", h.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let channel = &body.as_array().unwrap()[0];
        assert_eq!(channel["channel_username"], "ai_news");
        assert_eq!(channel["active"], true);
        assert!(channel["last_parsed_at"].is_null());
        h.fabric.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_user_is_a_400() {
        let h = harness().await;
        let response = h
            .client
            .get(format!("{}/users/404/channels", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("404"));
        h.fabric.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bad_hours_back_is_rejected() {
        let h = harness().await;
        let response = h
            .client
            .get(format!("{}/users/20000001/posts?hours_back=0", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        h.fabric.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn metrics_without_recorder_is_503() {
        let h = harness().await;
        let response = h
            .client
            .get(format!("{}/metrics", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 503);
        h.fabric.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unauthenticated_user_parse_is_401() {
        let h = harness().await;
        users::upsert(&h.db, 777, None, None).await.unwrap();
        let response = h
            .client
            .post(format!("{}/users/777/channels/parse", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
        h.fabric.shutdown();
    }
}
