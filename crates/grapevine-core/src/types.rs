// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the Grapevine workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Billing tier governing per-user quotas. Not to be confused with a
/// channel subscription, which is the user↔channel association.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize, Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Trial,
    Basic,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    /// Maximum number of active channel subscriptions for this tier.
    pub fn max_channels(&self) -> usize {
        match self {
            SubscriptionTier::Free => 3,
            SubscriptionTier::Trial => 5,
            SubscriptionTier::Basic => 10,
            SubscriptionTier::Premium => 25,
            SubscriptionTier::Enterprise => 100,
        }
    }

    /// Default post retention in days for this tier, before per-user overrides.
    pub fn default_retention_days(&self) -> u32 {
        match self {
            SubscriptionTier::Free | SubscriptionTier::Trial => 30,
            SubscriptionTier::Basic => 90,
            SubscriptionTier::Premium | SubscriptionTier::Enterprise => 365,
        }
    }

    /// Tier `free` never expires; everything else does.
    pub fn has_expiry(&self) -> bool {
        !matches!(self, SubscriptionTier::Free)
    }
}

/// Authentication state of a user's Telegram session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Pending,
    Authenticated,
    Blocked,
}

/// Per-post tagging lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaggingStatus {
    Pending,
    Success,
    Failed,
    Retrying,
}

/// Terminal outcome of indexing a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IndexOutcome {
    Success,
    Failed,
    Skipped,
}

/// Digest delivery cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DigestFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl DigestFrequency {
    /// Length of one digest period in days. Feeds the retention floor
    /// (`2 × digest_period_days`).
    pub fn period_days(&self) -> u32 {
        match self {
            DigestFrequency::Daily => 1,
            DigestFrequency::Weekly => 7,
            DigestFrequency::Monthly => 30,
        }
    }
}

/// Urgency classification attached to a captured group mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

// --- Telegram transport types ---

/// A resolved Telegram channel entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub username: String,
    pub channel_id: i64,
    pub title: String,
}

/// A message fetched from a channel during ingestion.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub message_id: i64,
    pub text: String,
    pub views: Option<i64>,
    pub url: Option<String>,
    pub posted_at: DateTime<Utc>,
}

/// A message observed in a monitored group chat.
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub chat_id: i64,
    pub chat_title: String,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_username: Option<String>,
    pub text: String,
    pub posted_at: DateTime<Utc>,
    /// Usernames referenced via `@username` entities.
    pub mention_usernames: Vec<String>,
    /// User ids referenced via text-mention entities (no username).
    pub mention_user_ids: Vec<i64>,
}

/// Decrypted per-user Telegram API credentials. Lives only in memory
/// inside the session fabric.
#[derive(Clone)]
pub struct TelegramCredentials {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: Option<String>,
}

impl std::fmt::Debug for TelegramCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCredentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"[redacted]")
            .field("phone", &self.phone.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

// --- Chat provider types ---

/// A single chat message in an LLM request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// A request to a chat provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// A response from a chat provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

// --- Vector store types ---

/// Payload attached to every chunk point in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub post_id: i64,
    pub channel_id: i64,
    pub channel_username: String,
    /// ISO 8601 string; keyword-indexed, so fine date bounds are applied
    /// after enrichment rather than in the store.
    pub posted_at: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub url: Option<String>,
    pub views: Option<i64>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub embedding_provider: String,
}

/// A chunk vector ready for upsert.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    /// Deterministic UUIDv5 of `post_{id}_chunk_{i}`.
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// A scored hit returned from vector search.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Store-level filters for vector search. Date bounds are intentionally
/// absent: `posted_at` is keyword-indexed and filtered post-hoc.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub channel_id: Option<i64>,
    pub tags: Option<Vec<String>>,
}

// --- Graph store types ---

/// A post as mirrored into the property graph.
#[derive(Debug, Clone)]
pub struct GraphPost {
    pub post_id: i64,
    pub telegram_id: i64,
    pub channel_id: i64,
    pub channel_username: String,
    pub posted_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// A tag with its usage count, from interest or trending rollups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub posts_count: i64,
}

/// A post related to a source post through shared tags or temporal proximity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNeighbor {
    pub post_id: i64,
    pub shared_tags: i64,
}

/// Graph expansion of one source post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExpansion {
    pub source_post_id: i64,
    pub related: Vec<GraphNeighbor>,
}

/// Context summary for a single post node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostGraphContext {
    pub post_id: i64,
    pub channel_username: String,
    pub tags: Vec<String>,
    pub related_count: i64,
}

// --- Delivery types ---

/// Output format for rendered digests and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    Markdown,
    Html,
    Plain,
}

/// Kind of outbound notification handed to the delivery surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Digest,
    MentionAlert,
}

/// A rendered notification for a single user.
#[derive(Debug, Clone)]
pub struct OutboundNotice {
    pub telegram_id: i64,
    pub kind: NoticeKind,
    pub format: RenderFormat,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn tier_roundtrips_through_strings() {
        for tier in [
            SubscriptionTier::Free,
            SubscriptionTier::Trial,
            SubscriptionTier::Basic,
            SubscriptionTier::Premium,
            SubscriptionTier::Enterprise,
        ] {
            let s = tier.to_string();
            assert_eq!(SubscriptionTier::from_str(&s).unwrap(), tier);
        }
        assert_eq!(SubscriptionTier::Free.to_string(), "free");
    }

    #[test]
    fn tier_quotas_grow_with_tier() {
        assert!(SubscriptionTier::Free.max_channels() < SubscriptionTier::Basic.max_channels());
        assert!(
            SubscriptionTier::Basic.max_channels() < SubscriptionTier::Enterprise.max_channels()
        );
        assert!(!SubscriptionTier::Free.has_expiry());
        assert!(SubscriptionTier::Premium.has_expiry());
    }

    #[test]
    fn digest_period_days() {
        assert_eq!(DigestFrequency::Daily.period_days(), 1);
        assert_eq!(DigestFrequency::Weekly.period_days(), 7);
        assert_eq!(DigestFrequency::Monthly.period_days(), 30);
    }

    #[test]
    fn status_enums_parse_lowercase() {
        assert_eq!(
            TaggingStatus::from_str("retrying").unwrap(),
            TaggingStatus::Retrying
        );
        assert_eq!(
            IndexOutcome::from_str("skipped").unwrap(),
            IndexOutcome::Skipped
        );
        assert_eq!(Urgency::from_str("high").unwrap(), Urgency::High);
        assert_eq!(
            AuthStatus::from_str("authenticated").unwrap(),
            AuthStatus::Authenticated
        );
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let creds = TelegramCredentials {
            api_id: 12345,
            api_hash: "super-secret".to_string(),
            phone: Some("+491701234567".to_string()),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("+49170"));
        assert!(rendered.contains("12345"));
    }

    #[test]
    fn chunk_payload_serializes_tags_as_array() {
        let payload = ChunkPayload {
            post_id: 7,
            channel_id: 100,
            channel_username: "ai_news".to_string(),
            posted_at: "2026-01-02T03:04:05Z".to_string(),
            tags: vec!["ai".to_string(), "llm".to_string()],
            url: None,
            views: Some(42),
            chunk_index: 0,
            total_chunks: 2,
            embedding_provider: "primary".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["post_id"], 7);
        assert_eq!(json["tags"][1], "llm");
        let back: ChunkPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_chunks, 2);
    }
}
