// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram transport traits.
//!
//! The session fabric owns one [`TelegramClient`] per authenticated user,
//! pinned to the ingestion loop. The concrete MTProto transport lives in an
//! external adapter; everything in this workspace programs against these
//! traits, and tests script them through the mock in `grapevine-test-utils`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::GrapevineError;
use crate::types::{ChannelInfo, ChannelMessage, GroupMessage, TelegramCredentials};

/// A connected, authorized user-mode Telegram session.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    /// The account id this session is authorized as.
    async fn authorized_user_id(&self) -> Result<i64, GrapevineError>;

    /// Resolve a channel username to its canonical entity. Flood waits
    /// surface as [`GrapevineError::RateLimited`] with the server hint.
    async fn resolve_channel(&self, username: &str) -> Result<ChannelInfo, GrapevineError>;

    /// Fetch messages with id strictly greater than `min_message_id`,
    /// oldest first, up to `limit`.
    async fn messages_after(
        &self,
        channel: &ChannelInfo,
        min_message_id: i64,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, GrapevineError>;

    /// Await the next message from any group chat this account belongs to.
    /// Pends until an event arrives; errors when the session drops.
    async fn next_group_message(&self) -> Result<GroupMessage, GrapevineError>;

    /// Fetch the messages surrounding `message_id` in a group chat,
    /// `before` older and `after` newer, in chronological order.
    async fn group_context(
        &self,
        chat_id: i64,
        message_id: i64,
        before: usize,
        after: usize,
    ) -> Result<Vec<GroupMessage>, GrapevineError>;

    /// Persist the authorization state to a session file.
    async fn persist_session(&self, path: &Path) -> Result<(), GrapevineError>;

    /// Tear down the connection. Idempotent.
    async fn disconnect(&self);
}

impl std::fmt::Debug for dyn TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TelegramClient")
    }
}

/// A pending QR login: deep link shown to the user, token lifetime.
#[derive(Debug, Clone)]
pub struct QrLogin {
    pub token: String,
    /// `tg://login?token=...` deep link to render as a QR code.
    pub deep_link: String,
    pub expires_at: DateTime<Utc>,
}

/// Waiter side of a QR login flow. Consumed exactly once.
#[async_trait]
pub trait QrWaiter: Send {
    /// Resolves with the connected client once the user confirms the login
    /// on another device, or errors on timeout / token expiry.
    async fn wait_authorized(
        self: Box<Self>,
        timeout: Duration,
    ) -> Result<Arc<dyn TelegramClient>, GrapevineError>;
}

/// Factory for Telegram sessions.
#[async_trait]
pub trait TelegramConnector: Send + Sync {
    /// Connect using a previously persisted session file. Fails with
    /// [`GrapevineError::AuthRequired`] when the session is absent or revoked.
    async fn connect(
        &self,
        telegram_id: i64,
        credentials: &TelegramCredentials,
        session_path: &Path,
    ) -> Result<Arc<dyn TelegramClient>, GrapevineError>;

    /// Begin a QR login flow: export a login token and return the deep link
    /// together with the waiter that resolves on confirmation.
    async fn begin_qr_login(
        &self,
        credentials: &TelegramCredentials,
    ) -> Result<(QrLogin, Box<dyn QrWaiter>), GrapevineError>;
}
