// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted Telegram transport for tests.
//!
//! `MockTelegram` plays the connector role: tests preload channels,
//! messages, group history and QR outcomes, then the fabric and parser run
//! against it exactly as they would against the real transport adapter.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use grapevine_core::GrapevineError;
use grapevine_core::traits::{QrLogin, QrWaiter, TelegramClient, TelegramConnector};
use grapevine_core::types::{ChannelInfo, ChannelMessage, GroupMessage, TelegramCredentials};

#[derive(Default)]
struct MockState {
    channels: Mutex<HashMap<String, ChannelInfo>>,
    messages: Mutex<HashMap<i64, Vec<ChannelMessage>>>,
    group_history: Mutex<HashMap<i64, Vec<GroupMessage>>>,
    qr_script: Mutex<VecDeque<i64>>,
    authorized: Mutex<HashSet<i64>>,
    flooded: Mutex<HashMap<String, Duration>>,
    rpc_threads: Mutex<Vec<ThreadId>>,
}

/// Scripted Telegram connector.
#[derive(Clone)]
pub struct MockTelegram {
    state: Arc<MockState>,
    events_tx: broadcast::Sender<GroupMessage>,
}

impl MockTelegram {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            state: Arc::new(MockState::default()),
            events_tx,
        }
    }

    /// Register a resolvable channel.
    pub fn add_channel(&self, username: &str, channel_id: i64, title: &str) {
        self.state.channels.lock().unwrap().insert(
            username.to_lowercase(),
            ChannelInfo {
                username: username.to_lowercase(),
                channel_id,
                title: title.to_string(),
            },
        );
    }

    /// Append messages to a channel's scripted history.
    pub fn add_channel_messages(&self, channel_id: i64, mut messages: Vec<ChannelMessage>) {
        let mut all = self.state.messages.lock().unwrap();
        all.entry(channel_id).or_default().append(&mut messages);
    }

    /// Seed the history of a group chat (for context windows).
    pub fn add_group_history(&self, chat_id: i64, messages: Vec<GroupMessage>) {
        let mut history = self.state.group_history.lock().unwrap();
        history.entry(chat_id).or_default().extend(messages);
    }

    /// Deliver a live group message to every connected client and record
    /// it in the group's history.
    pub fn inject_group_message(&self, message: GroupMessage) {
        self.state
            .group_history
            .lock()
            .unwrap()
            .entry(message.chat_id)
            .or_default()
            .push(message.clone());
        let _ = self.events_tx.send(message);
    }

    /// Script the account id the next QR login resolves as.
    pub fn script_qr_authorization(&self, telegram_id: i64) {
        self.state.qr_script.lock().unwrap().push_back(telegram_id);
    }

    /// Allow `connect` for this account without a session file.
    pub fn authorize(&self, telegram_id: i64) {
        self.state.authorized.lock().unwrap().insert(telegram_id);
    }

    /// Make channel resolution fail with a flood wait.
    pub fn set_flood(&self, username: &str, wait: Duration) {
        self.state
            .flooded
            .lock()
            .unwrap()
            .insert(username.to_lowercase(), wait);
    }

    /// Threads every scripted RPC ran on (loop-pinning assertions).
    pub fn rpc_threads(&self) -> Vec<ThreadId> {
        self.state.rpc_threads.lock().unwrap().clone()
    }

    fn make_client(&self, telegram_id: i64) -> Arc<dyn TelegramClient> {
        Arc::new(MockClient {
            telegram_id,
            state: Arc::clone(&self.state),
            events_rx: tokio::sync::Mutex::new(self.events_tx.subscribe()),
        })
    }
}

impl Default for MockTelegram {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelegramConnector for MockTelegram {
    async fn connect(
        &self,
        telegram_id: i64,
        _credentials: &TelegramCredentials,
        session_path: &Path,
    ) -> Result<Arc<dyn TelegramClient>, GrapevineError> {
        let preauthorized = self.state.authorized.lock().unwrap().contains(&telegram_id);
        if !preauthorized && !session_path.exists() {
            return Err(GrapevineError::AuthRequired { telegram_id });
        }
        Ok(self.make_client(telegram_id))
    }

    async fn begin_qr_login(
        &self,
        _credentials: &TelegramCredentials,
    ) -> Result<(QrLogin, Box<dyn QrWaiter>), GrapevineError> {
        let token = format!("mock-token-{}", self.state.qr_script.lock().unwrap().len());
        let login = QrLogin {
            deep_link: format!("tg://login?token={token}"),
            token,
            expires_at: Utc::now() + chrono::Duration::minutes(10),
        };
        let waiter = MockQrWaiter {
            connector: self.clone(),
        };
        Ok((login, Box::new(waiter)))
    }
}

struct MockQrWaiter {
    connector: MockTelegram,
}

#[async_trait]
impl QrWaiter for MockQrWaiter {
    async fn wait_authorized(
        self: Box<Self>,
        timeout: Duration,
    ) -> Result<Arc<dyn TelegramClient>, GrapevineError> {
        let scripted = self.connector.state.qr_script.lock().unwrap().pop_front();
        match scripted {
            Some(telegram_id) => {
                // A scan is never instantaneous.
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.connector.authorize(telegram_id);
                Ok(self.connector.make_client(telegram_id))
            }
            None => {
                tokio::time::sleep(timeout.min(Duration::from_millis(50))).await;
                Err(GrapevineError::Timeout { duration: timeout })
            }
        }
    }
}

struct MockClient {
    telegram_id: i64,
    state: Arc<MockState>,
    events_rx: tokio::sync::Mutex<broadcast::Receiver<GroupMessage>>,
}

impl MockClient {
    fn record_thread(&self) {
        self.state
            .rpc_threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
    }
}

#[async_trait]
impl TelegramClient for MockClient {
    async fn authorized_user_id(&self) -> Result<i64, GrapevineError> {
        self.record_thread();
        Ok(self.telegram_id)
    }

    async fn resolve_channel(&self, username: &str) -> Result<ChannelInfo, GrapevineError> {
        self.record_thread();
        let username = username.to_lowercase();
        if let Some(wait) = self.state.flooded.lock().unwrap().get(&username) {
            return Err(GrapevineError::RateLimited { wait: *wait });
        }
        self.state
            .channels
            .lock()
            .unwrap()
            .get(&username)
            .cloned()
            .ok_or_else(|| GrapevineError::Validation(format!("no such channel @{username}")))
    }

    async fn messages_after(
        &self,
        channel: &ChannelInfo,
        min_message_id: i64,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, GrapevineError> {
        self.record_thread();
        let messages = self.state.messages.lock().unwrap();
        let mut slice: Vec<ChannelMessage> = messages
            .get(&channel.channel_id)
            .map(|all| {
                all.iter()
                    .filter(|m| m.message_id > min_message_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        slice.sort_by_key(|m| m.message_id);
        slice.truncate(limit);
        Ok(slice)
    }

    async fn next_group_message(&self) -> Result<GroupMessage, GrapevineError> {
        loop {
            let result = self.events_rx.lock().await.recv().await;
            match result {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(GrapevineError::transient("event stream closed"));
                }
            }
        }
    }

    async fn group_context(
        &self,
        chat_id: i64,
        message_id: i64,
        before: usize,
        after: usize,
    ) -> Result<Vec<GroupMessage>, GrapevineError> {
        self.record_thread();
        let history = self.state.group_history.lock().unwrap();
        let Some(messages) = history.get(&chat_id) else {
            return Ok(Vec::new());
        };
        let mut sorted: Vec<GroupMessage> = messages.clone();
        sorted.sort_by_key(|m| m.message_id);
        let Some(center) = sorted.iter().position(|m| m.message_id == message_id) else {
            return Ok(Vec::new());
        };
        let start = center.saturating_sub(before);
        let end = (center + after + 1).min(sorted.len());
        Ok(sorted[start..end].to_vec())
    }

    async fn persist_session(&self, path: &Path) -> Result<(), GrapevineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(GrapevineError::storage)?;
        }
        std::fs::write(path, format!("mock-session:{}", self.telegram_id))
            .map_err(GrapevineError::storage)
    }

    async fn disconnect(&self) {}
}
