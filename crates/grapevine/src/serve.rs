// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `grapevine serve` — wires configuration into the running platform.
//!
//! Build order: vault → relational store → cache → vector/graph gateways
//! → embedding and chat providers → enrichment services → session fabric
//! (its own thread and loop) → mention monitors → scheduler → HTTP
//! gateway on the main runtime. Optional backends degrade at startup with
//! a warning instead of refusing to boot: only the vault key, the
//! relational store and the vector store are load-bearing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use grapevine_cache::{MemoryCache, RedisCache};
use grapevine_config::GrapevineConfig;
use grapevine_core::GrapevineError;
use grapevine_core::traits::{Cache, ChatProvider, DeliverySurface, EmbeddingProvider, GraphStore, VectorIndex};
use grapevine_core::types::TelegramCredentials;
use grapevine_cron::{Scheduler, SchedulerConfig};
use grapevine_embeddings::{EmbeddingService, HttpEmbedder, OnnxEmbedder};
use grapevine_enrich::{Indexer, RetentionReaper, Tagger};
use grapevine_fabric::{Fabric, FabricSeed};
use grapevine_gateway::{install_metrics, start_server, GatewayState, ServerConfig};
use grapevine_graph::{CachedGraph, Neo4jHttp};
use grapevine_ingest::{LinkCrawler, MentionMonitor, Parser};
use grapevine_llm::{FallbackChat, HttpChatClient};
use grapevine_retrieval::{DigestGenerator, RetrievalDefaults, RetrievalEngine};
use grapevine_store::Database;
use grapevine_store::queries::users;
use grapevine_vault::Vault;
use grapevine_vector::QdrantIndex;

use crate::delivery::{BotApiDelivery, LogDelivery};
use crate::transport::UnconfiguredTelegram;

pub async fn run_serve(config: GrapevineConfig) -> Result<(), GrapevineError> {
    init_tracing(&config.app.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting grapevine");

    let timezone: Tz = config
        .app
        .timezone
        .parse()
        .map_err(|_| GrapevineError::Config(format!("unknown timezone {}", config.app.timezone)))?;
    let key = config
        .vault
        .encryption_key
        .as_deref()
        .ok_or_else(|| GrapevineError::Config("vault encryption key is not set".into()))?;
    let vault = Arc::new(Vault::from_key_string(key)?);

    if let Some(parent) = Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent).map_err(GrapevineError::storage)?;
    }
    let db = Database::open(&config.database.path).await?;

    let cache = build_cache(&config).await;
    let vectors: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(
        &config.vector.url,
        config.vector.api_key.as_deref(),
    )?);
    let graph = build_graph(&config, &cache);

    let embeddings = build_embeddings(&config, &cache)?;
    let (chat, digest_chat) = build_chat(&config)?;
    let delivery = build_delivery(&config)?;

    let tagger = Arc::new(Tagger::new(db.clone(), Arc::clone(&chat)));
    let indexer = Arc::new(Indexer::new(
        db.clone(),
        Arc::clone(&vectors),
        graph.clone(),
        Arc::clone(&embeddings),
    ));
    let reaper = Arc::new(RetentionReaper::new(
        db.clone(),
        Arc::clone(&vectors),
        graph.clone(),
    ));
    let crawler = match &config.enrichment.crawler_url {
        Some(url) => Some(Arc::new(LinkCrawler::new(
            url,
            Duration::from_secs(config.enrichment.timeout_secs),
        )?)),
        None => None,
    };
    let parser = Arc::new(Parser::new(
        db.clone(),
        Arc::clone(&reaper),
        Arc::clone(&tagger),
        Arc::clone(&indexer),
        crawler,
        config.parser.max_messages_per_channel,
    ));

    let defaults = RetrievalDefaults {
        hybrid_search: config.features.hybrid_search,
        query_expansion: config.features.query_expansion,
        ..RetrievalDefaults::default()
    };
    let engine = Arc::new(RetrievalEngine::new(
        db.clone(),
        Arc::clone(&vectors),
        graph.clone(),
        Arc::clone(&embeddings),
        Arc::clone(&chat),
        config.vector.score_threshold,
        defaults,
    ));
    let digests = Arc::new(DigestGenerator::new(
        db.clone(),
        Arc::clone(&engine),
        digest_chat,
        Arc::clone(&delivery),
    ));

    let master_credentials = match (config.telegram.api_id, config.telegram.api_hash.clone()) {
        (Some(api_id), Some(api_hash)) => Some(TelegramCredentials {
            api_id,
            api_hash,
            phone: None,
        }),
        _ => None,
    };
    let fabric = Fabric::spawn(FabricSeed {
        connector: Arc::new(UnconfiguredTelegram),
        db: db.clone(),
        vault,
        cache: Arc::clone(&cache),
        sessions_dir: PathBuf::from(&config.telegram.sessions_dir),
        master_credentials,
    })?;

    start_mention_monitors(&config, &db, &fabric, &chat, &delivery).await;

    let cleanup_time = grapevine_config::parse_cleanup_time(&config.retention.cleanup_time)
        .ok_or_else(|| {
            GrapevineError::Config(format!(
                "retention.cleanup_time '{}' is not HH:MM",
                config.retention.cleanup_time
            ))
        })?;
    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        fabric.handle(),
        Arc::clone(&parser),
        reaper,
        tagger,
        indexer,
        digests,
        SchedulerConfig {
            parse_interval: Duration::from_secs(config.parser.interval_minutes * 60),
            cleanup_time,
            timezone,
            ..SchedulerConfig::default()
        },
    ));
    let shutdown = scheduler.cancellation_token();
    let scheduler_join = tokio::spawn(Arc::clone(&scheduler).run());
    install_signal_handler(shutdown.clone());

    let prometheus = match install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable");
            None
        }
    };
    let state = GatewayState {
        db: db.clone(),
        fabric: fabric.handle(),
        parser,
        timezone,
        start_time: Instant::now(),
        prometheus,
    };
    let server_config = ServerConfig {
        host: config.app.bind_host.clone(),
        port: config.app.bind_port,
    };
    let result = start_server(&server_config, state, shutdown.clone()).await;

    info!("shutting down");
    shutdown.cancel();
    Arc::clone(&scheduler).shutdown(scheduler_join).await;
    fabric.shutdown();
    if let Err(e) = db.close().await {
        warn!(error = %e, "database close failed");
    }
    result
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn build_cache(config: &GrapevineConfig) -> Arc<dyn Cache> {
    match RedisCache::new(&config.cache.url(), 16) {
        Ok(redis) => match redis.health_check().await {
            Ok(()) => return Arc::new(redis),
            Err(e) => warn!(error = %e, "redis unreachable, using the in-process cache"),
        },
        Err(e) => warn!(error = %e, "redis misconfigured, using the in-process cache"),
    }
    Arc::new(MemoryCache::new())
}

fn build_graph(config: &GrapevineConfig, cache: &Arc<dyn Cache>) -> Option<Arc<dyn GraphStore>> {
    match Neo4jHttp::new(
        &config.graph.url,
        &config.graph.database,
        config.graph.user.as_deref(),
        config.graph.password.as_deref(),
    ) {
        Ok(raw) => Some(Arc::new(CachedGraph::new(
            Arc::new(raw),
            Arc::clone(cache),
        ))),
        Err(e) => {
            warn!(error = %e, "graph store unavailable, hybrid signals disabled");
            None
        }
    }
}

fn build_embeddings(
    config: &GrapevineConfig,
    cache: &Arc<dyn Cache>,
) -> Result<Arc<EmbeddingService>, GrapevineError> {
    let primary: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbedder::new(
        &config.llm.primary_base_url,
        config.llm.primary_api_key.as_deref(),
        &config.embeddings.primary_model,
        config.embeddings.primary_max_tokens,
        config.embeddings.primary_overlap_tokens,
        Duration::from_secs(config.embeddings.timeout_secs),
    )?);
    let fallback: Option<Arc<dyn EmbeddingProvider>> =
        match &config.embeddings.fallback_model_path {
            Some(path) => match OnnxEmbedder::new(
                Path::new(path),
                config.embeddings.fallback_max_tokens,
                config.embeddings.fallback_overlap_tokens,
            ) {
                Ok(onnx) => Some(Arc::new(onnx)),
                Err(e) => {
                    warn!(error = %e, "local embedding fallback unavailable");
                    None
                }
            },
            None => None,
        };
    let embed_cache = config.embeddings.cache_enabled.then(|| Arc::clone(cache));
    Ok(Arc::new(EmbeddingService::new(primary, fallback, embed_cache)))
}

/// The answer-synthesis chain and the digest chain share providers but
/// not timeouts: digest summaries run much longer prompts.
fn build_chat(
    config: &GrapevineConfig,
) -> Result<(Arc<dyn ChatProvider>, Arc<dyn ChatProvider>), GrapevineError> {
    let secondary: Option<Arc<dyn ChatProvider>> = match &config.llm.secondary_api_key {
        Some(key) => Some(Arc::new(HttpChatClient::new(
            "secondary",
            &config.llm.secondary_base_url,
            Some(key),
            &config.llm.secondary_model,
            Duration::from_secs(config.llm.chat_timeout_secs),
        )?)),
        None => None,
    };

    let primary = Arc::new(HttpChatClient::new(
        "primary",
        &config.llm.primary_base_url,
        config.llm.primary_api_key.as_deref(),
        &config.llm.primary_model,
        Duration::from_secs(config.llm.chat_timeout_secs),
    )?);
    let chat: Arc<dyn ChatProvider> =
        Arc::new(FallbackChat::new(primary, secondary.clone()));

    let digest_primary = Arc::new(HttpChatClient::new(
        "primary",
        &config.llm.primary_base_url,
        config.llm.primary_api_key.as_deref(),
        &config.llm.primary_model,
        Duration::from_secs(config.llm.digest_timeout_secs),
    )?);
    let digest_chat: Arc<dyn ChatProvider> =
        Arc::new(FallbackChat::new(digest_primary, secondary));

    Ok((chat, digest_chat))
}

fn build_delivery(config: &GrapevineConfig) -> Result<Arc<dyn DeliverySurface>, GrapevineError> {
    match &config.delivery.bot_token {
        Some(token) => Ok(Arc::new(BotApiDelivery::new(token)?)),
        None => {
            warn!("no delivery bot token configured, notices will only be logged");
            Ok(Arc::new(LogDelivery))
        }
    }
}

/// Subscribe every already-authenticated user's mention monitor on the
/// ingestion loop. Per-user failures only warn: a user with a broken
/// session still parses once they re-authenticate.
async fn start_mention_monitors(
    config: &GrapevineConfig,
    db: &Database,
    fabric: &Fabric,
    chat: &Arc<dyn ChatProvider>,
    delivery: &Arc<dyn DeliverySurface>,
) {
    let monitor = Arc::new(MentionMonitor::new(
        db.clone(),
        Arc::clone(chat),
        Arc::clone(delivery),
        config.mentions.max_pending_per_user,
    ));
    let db = db.clone();
    let result = fabric
        .handle()
        .submit(move |ctx| async move {
            let all = users::list_authenticated(&db).await?;
            let mut started = 0usize;
            for user in all {
                match ctx.registry.get_client(user.telegram_id).await {
                    Ok(client) => {
                        if monitor.start_for_user(client, &user).await?.is_some() {
                            started += 1;
                        }
                    }
                    Err(e) => warn!(
                        telegram_id = user.telegram_id,
                        error = %e,
                        "cannot start mention monitor"
                    ),
                }
            }
            Ok::<usize, GrapevineError>(started)
        })
        .await;
    match result {
        Ok(Ok(started)) => info!(started, "mention monitors running"),
        Ok(Err(e)) | Err(e) => warn!(error = %e, "mention monitor startup failed"),
    }
}

fn install_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, shutting down");
        }

        token.cancel();
    });
}
