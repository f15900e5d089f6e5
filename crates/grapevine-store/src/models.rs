// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the relational store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use grapevine_core::types::{
    AuthStatus, DigestFrequency, IndexOutcome, RenderFormat, SubscriptionTier, TaggingStatus,
    Urgency,
};

/// Per-user feature flags, stored as a JSON column. Unset flags fall back
/// to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid_search: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_expansion: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentions_enabled: Option<bool>,
}

/// A platform user.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    /// Vault-encrypted API credentials; opaque outside the session fabric.
    pub api_id_enc: Option<String>,
    pub api_hash_enc: Option<String>,
    pub phone_enc: Option<String>,
    pub auth_status: AuthStatus,
    pub tier: SubscriptionTier,
    pub subscription_expires: Option<DateTime<Utc>>,
    pub retention_days: u32,
    pub role: String,
    pub failed_auth_attempts: u32,
    pub last_auth_attempt: Option<DateTime<Utc>>,
    pub block_expires: Option<DateTime<Utc>>,
    pub feature_flags: FeatureFlags,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Invariant: `subscription_expires > now` ⇔ subscription is active;
    /// tier `free` has no expiry.
    pub fn subscription_active(&self, now: DateTime<Utc>) -> bool {
        if !self.tier.has_expiry() {
            return true;
        }
        matches!(self.subscription_expires, Some(expires) if expires > now)
    }

    /// Whether the auth cooldown block has elapsed.
    pub fn block_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.block_expires {
            Some(expires) => expires <= now,
            None => true,
        }
    }
}

/// A Telegram channel, shared across users.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: i64,
    pub channel_username: String,
    pub telegram_channel_id: Option<i64>,
    pub title: Option<String>,
}

/// The user↔channel association with its parsing state.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub user_id: i64,
    pub channel_id: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Per-channel ingestion watermark for this user.
    pub last_parsed_at: Option<DateTime<Utc>>,
}

/// An ingested post.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub channel_id: i64,
    pub telegram_message_id: i64,
    pub text: String,
    pub views: Option<i64>,
    pub url: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub tags: Option<Vec<String>>,
    pub tagging_status: TaggingStatus,
    pub tagging_attempts: u32,
    pub enriched_content: Option<String>,
}

/// A post as produced by the parser, before it has a row id.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub telegram_message_id: i64,
    pub text: String,
    pub views: Option<i64>,
    pub url: Option<String>,
    pub posted_at: DateTime<Utc>,
}

/// Indexing outcome for one (user, post). Records the first chunk only;
/// subsequent chunks share this row.
#[derive(Debug, Clone)]
pub struct IndexingStatus {
    pub user_id: i64,
    pub post_id: i64,
    pub vector_id: Option<String>,
    pub status: IndexOutcome,
    pub error: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

/// Per-user vector collection metadata: the provider-switch detection record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSignature {
    pub user_id: i64,
    pub vector_size: usize,
    pub provider_signature: String,
}

/// An invite code granting access and a preconfigured tier.
#[derive(Debug, Clone)]
pub struct InviteCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
    pub uses_count: u32,
    pub default_tier: SubscriptionTier,
    pub default_trial_days: Option<u32>,
}

/// Per-user digest preferences.
#[derive(Debug, Clone)]
pub struct DigestSettings {
    pub user_id: i64,
    pub enabled: bool,
    pub frequency: DigestFrequency,
    /// Local delivery time, `HH:MM`.
    pub send_time: String,
    pub timezone: String,
    pub channels: Option<Vec<i64>>,
    pub topics: Option<Vec<String>>,
    pub max_posts: usize,
    pub format: RenderFormat,
    pub ai_summarize: bool,
    pub preferred_topics: Vec<String>,
    pub summary_style: String,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

impl DigestSettings {
    /// Defaults for a user who never touched their digest preferences.
    pub fn defaults(user_id: i64) -> Self {
        Self {
            user_id,
            enabled: false,
            frequency: DigestFrequency::Daily,
            send_time: "09:00".to_string(),
            timezone: "UTC".to_string(),
            channels: None,
            topics: None,
            max_posts: 20,
            format: RenderFormat::Markdown,
            ai_summarize: false,
            preferred_topics: Vec::new(),
            summary_style: "concise".to_string(),
            last_sent_at: None,
            next_scheduled_at: None,
        }
    }
}

/// A monitored group chat.
#[derive(Debug, Clone)]
pub struct ChatGroup {
    pub id: i64,
    pub chat_id: i64,
    pub title: String,
}

/// Per-user mention monitoring preferences.
#[derive(Debug, Clone)]
pub struct GroupSettings {
    pub user_id: i64,
    pub mentions_enabled: bool,
    pub context_window: usize,
}

/// A captured mention of the user inside a group chat.
#[derive(Debug, Clone)]
pub struct GroupMention {
    pub id: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub message_id: i64,
    pub context: String,
    pub reason: Option<String>,
    pub urgency: Urgency,
    pub notified: bool,
    pub captured_at: DateTime<Utc>,
}
