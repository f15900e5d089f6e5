// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Grapevine platform.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup. Every externally recognized setting has a
//! compiled default except the secrets, which stay `Option`.

use serde::{Deserialize, Serialize};

/// Top-level Grapevine configuration.
///
/// Loaded from TOML with `GRAPEVINE_`-prefixed environment overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GrapevineConfig {
    /// Process-wide settings (timezone, logging, bind address).
    #[serde(default)]
    pub app: AppConfig,

    /// Credential vault settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Telegram API master credentials and session storage.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Relational store settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Vector store settings.
    #[serde(default)]
    pub vector: VectorConfig,

    /// Graph store settings.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding provider settings.
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,

    /// Ingestion parser settings.
    #[serde(default)]
    pub parser: ParserConfig,

    /// Retention policy settings.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Mention monitor settings.
    #[serde(default)]
    pub mentions: MentionsConfig,

    /// Notification delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Optional link-enrichment crawler settings.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Per-user feature flag defaults.
    #[serde(default)]
    pub features: FeatureDefaults,
}

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// IANA timezone used by the presentation layer and daily schedules.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Gateway bind host.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Gateway bind port.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            log_level: default_log_level(),
            bind_host: default_bind_host(),
            bind_port: default_bind_port(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8088
}

/// Credential vault settings. The key itself always comes from the
/// environment (`GRAPEVINE_VAULT_ENCRYPTION_KEY`), never from a file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Base64- or hex-encoded 32-byte AES-256-GCM key. Missing key aborts startup.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

/// Telegram API settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    /// Master API id used when a user has no personal credentials.
    #[serde(default)]
    pub api_id: Option<i32>,

    /// Master API hash.
    #[serde(default)]
    pub api_hash: Option<String>,

    /// Directory holding per-user session files
    /// (`sessions/user_{telegram_id}.session`).
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_id: None,
            api_hash: None,
            sessions_dir: default_sessions_dir(),
        }
    }
}

fn default_sessions_dir() -> String {
    "sessions".to_string()
}

/// Relational store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("grapevine").join("grapevine.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("grapevine.db"))
        .to_string_lossy()
        .into_owned()
}

/// Vector store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VectorConfig {
    /// Qdrant endpoint URL.
    #[serde(default = "default_vector_url")]
    pub url: String,

    /// Optional API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Minimum similarity score returned from search.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            api_key: None,
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_vector_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_score_threshold() -> f32 {
    0.35
}

/// Graph store settings (Neo4j HTTP transaction API).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    /// Base URL of the graph store HTTP endpoint.
    #[serde(default = "default_graph_url")]
    pub url: String,

    /// Database name within the graph store.
    #[serde(default = "default_graph_database")]
    pub database: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: default_graph_url(),
            database: default_graph_database(),
            user: None,
            password: None,
        }
    }
}

fn default_graph_url() -> String {
    "http://localhost:7474".to_string()
}

fn default_graph_database() -> String {
    "neo4j".to_string()
}

/// Cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_host")]
    pub host: String,

    #[serde(default = "default_cache_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,
}

impl CacheConfig {
    /// Render a redis connection URL from the parts.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{password}@{}:{}", self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: default_cache_host(),
            port: default_cache_port(),
            password: None,
        }
    }
}

fn default_cache_host() -> String {
    "127.0.0.1".to_string()
}

fn default_cache_port() -> u16 {
    6379
}

/// LLM provider settings. The primary endpoint serves chat and embeddings
/// behind one base URL; the secondary provider is chat-only fallback.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Base URL of the primary OpenAI-compatible endpoint.
    #[serde(default = "default_primary_base_url")]
    pub primary_base_url: String,

    #[serde(default)]
    pub primary_api_key: Option<String>,

    /// Chat model served by the primary endpoint.
    #[serde(default = "default_primary_model")]
    pub primary_model: String,

    /// API key for the secondary fallback provider.
    #[serde(default)]
    pub secondary_api_key: Option<String>,

    #[serde(default = "default_secondary_base_url")]
    pub secondary_base_url: String,

    #[serde(default = "default_secondary_model")]
    pub secondary_model: String,

    /// Answer-synthesis timeout in seconds.
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,

    /// Digest-summary timeout in seconds (longer prompts).
    #[serde(default = "default_digest_timeout_secs")]
    pub digest_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary_base_url: default_primary_base_url(),
            primary_api_key: None,
            primary_model: default_primary_model(),
            secondary_api_key: None,
            secondary_base_url: default_secondary_base_url(),
            secondary_model: default_secondary_model(),
            chat_timeout_secs: default_chat_timeout_secs(),
            digest_timeout_secs: default_digest_timeout_secs(),
        }
    }
}

fn default_primary_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_primary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_secondary_base_url() -> String {
    "https://api.deepseek.com".to_string()
}

fn default_secondary_model() -> String {
    "deepseek-chat".to_string()
}

fn default_chat_timeout_secs() -> u64 {
    60
}

fn default_digest_timeout_secs() -> u64 {
    120
}

/// Embedding provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingsConfig {
    /// Embedding model name on the primary endpoint.
    #[serde(default = "default_embedding_model")]
    pub primary_model: String,

    /// Chunk window for the primary provider.
    #[serde(default = "default_primary_chunk_tokens")]
    pub primary_max_tokens: usize,

    /// Chunk overlap for the primary provider.
    #[serde(default = "default_primary_overlap_tokens")]
    pub primary_overlap_tokens: usize,

    /// Chunk window for the local fallback model.
    #[serde(default = "default_fallback_chunk_tokens")]
    pub fallback_max_tokens: usize,

    /// Chunk overlap for the local fallback model.
    #[serde(default = "default_fallback_overlap_tokens")]
    pub fallback_overlap_tokens: usize,

    /// Path to the local ONNX fallback model (`model.onnx` + `tokenizer.json`).
    #[serde(default)]
    pub fallback_model_path: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,

    /// Reuse embeddings through the cache (`embedding:{md5}` keys, 24h TTL).
    #[serde(default)]
    pub cache_enabled: bool,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            primary_model: default_embedding_model(),
            primary_max_tokens: default_primary_chunk_tokens(),
            primary_overlap_tokens: default_primary_overlap_tokens(),
            fallback_max_tokens: default_fallback_chunk_tokens(),
            fallback_overlap_tokens: default_fallback_overlap_tokens(),
            fallback_model_path: None,
            timeout_secs: default_embed_timeout_secs(),
            cache_enabled: false,
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_primary_chunk_tokens() -> usize {
    1024
}

fn default_primary_overlap_tokens() -> usize {
    128
}

fn default_fallback_chunk_tokens() -> usize {
    256
}

fn default_fallback_overlap_tokens() -> usize {
    32
}

fn default_embed_timeout_secs() -> u64 {
    30
}

/// Ingestion parser settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParserConfig {
    /// Minutes between parse-all passes.
    #[serde(default = "default_parse_interval_minutes")]
    pub interval_minutes: u64,

    /// Hard ceiling on messages fetched per channel per pass.
    #[serde(default = "default_max_messages")]
    pub max_messages_per_channel: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_parse_interval_minutes(),
            max_messages_per_channel: default_max_messages(),
        }
    }
}

fn default_parse_interval_minutes() -> u64 {
    30
}

fn default_max_messages() -> usize {
    200
}

/// Retention policy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Default retention in days for users without an override.
    #[serde(default = "default_retention_days")]
    pub default_days: u32,

    /// Local time (`HH:MM`) of the daily cleanup run.
    #[serde(default = "default_cleanup_time")]
    pub cleanup_time: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_days: default_retention_days(),
            cleanup_time: default_cleanup_time(),
        }
    }
}

fn default_retention_days() -> u32 {
    90
}

fn default_cleanup_time() -> String {
    "03:30".to_string()
}

/// Mention monitor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MentionsConfig {
    /// Messages fetched before and after a mention for context.
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Maximum queued mentions per user; overflow drops the oldest.
    #[serde(default = "default_max_pending")]
    pub max_pending_per_user: usize,
}

impl Default for MentionsConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            max_pending_per_user: default_max_pending(),
        }
    }
}

fn default_context_window() -> usize {
    5
}

fn default_max_pending() -> usize {
    32
}

/// Notification delivery settings. Digests and mention alerts go out
/// through the Telegram Bot API; without a token they are only logged.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Bot token for the delivery surface.
    #[serde(default)]
    pub bot_token: Option<String>,
}

/// Optional external link-enrichment service (`{success, markdown,
/// word_count}` contract). Unset disables crawling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentConfig {
    /// Base URL of the crawler service.
    #[serde(default)]
    pub crawler_url: Option<String>,

    /// Per-crawl timeout in seconds.
    #[serde(default = "default_crawl_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            crawler_url: None,
            timeout_secs: default_crawl_timeout_secs(),
        }
    }
}

fn default_crawl_timeout_secs() -> u64 {
    20
}

/// Defaults applied when a user has no explicit feature flags.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureDefaults {
    #[serde(default = "default_true")]
    pub hybrid_search: bool,

    #[serde(default)]
    pub query_expansion: bool,
}

impl Default for FeatureDefaults {
    fn default() -> Self {
        Self {
            hybrid_search: default_true(),
            query_expansion: false,
        }
    }
}

fn default_true() -> bool {
    true
}
