// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group mention monitoring.
//!
//! One long-lived event subscription per authenticated user, living on
//! the same loop as the parser. Matched mentions go through a bounded
//! pending queue (overflow drops the oldest), get a context window
//! fetched around them, a summary from the external summarizer, a
//! `group_mentions` row and a notification through the delivery surface.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use grapevine_core::GrapevineError;
use grapevine_core::traits::{ChatProvider, DeliverySurface, TelegramClient};
use grapevine_core::types::{
    ChatMessage, ChatRequest, GroupMessage, NoticeKind, OutboundNotice, RenderFormat, Urgency,
};
use grapevine_store::Database;
use grapevine_store::models::User;
use grapevine_store::queries::groups;

const SUMMARY_PROMPT: &str = r#"Тебя упомянули в групповом чате Telegram. Ниже контекст переписки;
строка с ">>" — сообщение с упоминанием.

{context}

Ответь строго JSON-объектом без пояснений:
{"summary": "краткая суть происходящего, 1-2 предложения",
 "reason": "почему упомянули",
 "urgency": "low|medium|high"}"#;

#[derive(Debug, Deserialize)]
struct MentionSummary {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    urgency: Option<String>,
}

/// Cancels the user's listener and processor tasks when dropped or stopped.
pub struct MonitorHandle {
    token: CancellationToken,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Watches group chats for mentions of monitored users.
#[derive(Clone)]
pub struct MentionMonitor {
    db: Database,
    summarizer: Arc<dyn ChatProvider>,
    delivery: Arc<dyn DeliverySurface>,
    max_pending: usize,
}

impl MentionMonitor {
    pub fn new(
        db: Database,
        summarizer: Arc<dyn ChatProvider>,
        delivery: Arc<dyn DeliverySurface>,
        max_pending: usize,
    ) -> Self {
        Self {
            db,
            summarizer,
            delivery,
            max_pending,
        }
    }

    /// Subscribe to the user's group events. Returns `None` when the user
    /// has mentions disabled. The two spawned tasks run until the handle
    /// is stopped or the session drops.
    pub async fn start_for_user(
        &self,
        client: Arc<dyn TelegramClient>,
        user: &User,
    ) -> Result<Option<MonitorHandle>, GrapevineError> {
        let settings = groups::settings_or_default(&self.db, user.id).await?;
        let enabled = user
            .feature_flags
            .mentions_enabled
            .unwrap_or(settings.mentions_enabled);
        if !enabled {
            debug!(telegram_id = user.telegram_id, "mentions disabled, not monitoring");
            return Ok(None);
        }

        let token = CancellationToken::new();
        let queue = Arc::new(Mutex::new(VecDeque::<GroupMessage>::new()));
        let wakeup = Arc::new(Notify::new());

        let listener = {
            let monitor = self.clone();
            let client = Arc::clone(&client);
            let user = user.clone();
            let queue = Arc::clone(&queue);
            let wakeup = Arc::clone(&wakeup);
            let token = token.clone();
            async move {
                loop {
                    let message = tokio::select! {
                        _ = token.cancelled() => break,
                        result = client.next_group_message() => match result {
                            Ok(message) => message,
                            Err(e) => {
                                warn!(telegram_id = user.telegram_id, error = %e,
                                      "group event stream ended");
                                break;
                            }
                        },
                    };
                    if !is_mention_of(&message, &user) {
                        continue;
                    }
                    let dropped =
                        push_pending(&mut *queue.lock().await, message, monitor.max_pending);
                    if dropped {
                        warn!(
                            telegram_id = user.telegram_id,
                            "pending mention queue full, dropped oldest"
                        );
                    }
                    metrics::gauge!("grapevine_pending_mentions")
                        .set(queue.lock().await.len() as f64);
                    wakeup.notify_one();
                }
            }
        };

        let processor = {
            let monitor = self.clone();
            let user = user.clone();
            let context_window = settings.context_window;
            let token = token.clone();
            async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some(message) = next else {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = wakeup.notified() => continue,
                        }
                    };
                    if let Err(e) = monitor
                        .process_mention(client.as_ref(), &user, context_window, &message)
                        .await
                    {
                        warn!(
                            telegram_id = user.telegram_id,
                            message_id = message.message_id,
                            error = %e,
                            "mention processing failed"
                        );
                    }
                }
            }
        };

        tokio::spawn(listener);
        tokio::spawn(processor);
        info!(telegram_id = user.telegram_id, "mention monitor started");
        Ok(Some(MonitorHandle { token }))
    }

    async fn process_mention(
        &self,
        client: &dyn TelegramClient,
        user: &User,
        context_window: usize,
        message: &GroupMessage,
    ) -> Result<(), GrapevineError> {
        let group = groups::upsert_group(&self.db, message.chat_id, &message.chat_title).await?;
        groups::ensure_membership(&self.db, user.id, group.id).await?;

        let window = client
            .group_context(
                message.chat_id,
                message.message_id,
                context_window,
                context_window,
            )
            .await
            .unwrap_or_default();
        let context_text = render_window(&window, message.message_id);

        let (summary, reason, urgency) = self.summarize(&context_text).await;
        let context = if summary.is_empty() {
            context_text.clone()
        } else {
            summary
        };

        let mention_id = groups::insert_mention(
            &self.db,
            user.id,
            group.id,
            message.message_id,
            &context,
            reason.as_deref(),
            urgency,
            Utc::now(),
        )
        .await?;
        metrics::counter!("grapevine_mentions_captured_total").increment(1);

        let notice = OutboundNotice {
            telegram_id: user.telegram_id,
            kind: NoticeKind::MentionAlert,
            format: RenderFormat::Markdown,
            body: format!(
                "🔔 *Упоминание в «{}»*\n\n{}\n\nСрочность: {}",
                message.chat_title, context, urgency
            ),
        };
        match self.delivery.deliver(notice).await {
            Ok(()) => groups::mark_notified(&self.db, mention_id).await,
            Err(e) => {
                warn!(mention_id, error = %e, "mention notification failed");
                Ok(())
            }
        }
    }

    /// Ask the summarizer for a context summary. LLM failure degrades to
    /// the raw window with medium urgency.
    async fn summarize(&self, context_text: &str) -> (String, Option<String>, Urgency) {
        let request = ChatRequest {
            messages: vec![ChatMessage::user(
                SUMMARY_PROMPT.replace("{context}", context_text),
            )],
            max_tokens: 512,
            temperature: Some(0.3),
        };
        match self.summarizer.complete(request).await {
            Ok(response) => {
                let parsed = parse_summary(&response.content);
                let urgency = parsed
                    .urgency
                    .as_deref()
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(Urgency::Medium);
                (parsed.summary, parsed.reason, urgency)
            }
            Err(e) => {
                warn!(error = %e, "mention summarizer failed, storing raw context");
                (String::new(), None, Urgency::Medium)
            }
        }
    }
}

/// Whether the message references the user, by `@username` entity or text,
/// or by a direct entity id. The user's own messages never count.
fn is_mention_of(message: &GroupMessage, user: &User) -> bool {
    if message.sender_id == user.telegram_id {
        return false;
    }
    if message.mention_user_ids.contains(&user.telegram_id) {
        return true;
    }
    let Some(username) = &user.username else {
        return false;
    };
    let username = username.to_lowercase();
    message
        .mention_usernames
        .iter()
        .any(|m| m.to_lowercase() == username)
        || message
            .text
            .to_lowercase()
            .contains(&format!("@{username}"))
}

/// Append to the bounded pending queue; returns true when the oldest entry
/// was dropped to make room.
fn push_pending(queue: &mut VecDeque<GroupMessage>, message: GroupMessage, max: usize) -> bool {
    queue.push_back(message);
    if queue.len() > max {
        queue.pop_front();
        return true;
    }
    false
}

fn render_window(window: &[GroupMessage], mention_id: i64) -> String {
    window
        .iter()
        .map(|m| {
            let sender = m.sender_username.as_deref().unwrap_or("аноним");
            let marker = if m.message_id == mention_id { ">> " } else { "" };
            format!("{marker}[{sender}] {}", m.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull the JSON object out of the summarizer response, tolerating code
/// fences and surrounding prose.
fn parse_summary(response: &str) -> MentionSummary {
    let trimmed = response.trim();
    let start = trimmed.find('{').unwrap_or(0);
    let end = trimmed.rfind('}').map(|i| i + 1).unwrap_or(trimmed.len());
    if start >= end {
        return MentionSummary {
            summary: String::new(),
            reason: None,
            urgency: None,
        };
    }
    serde_json::from_str(&trimmed[start..end]).unwrap_or(MentionSummary {
        summary: String::new(),
        reason: None,
        urgency: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use grapevine_core::types::TelegramCredentials;
    use grapevine_store::models::FeatureFlags;
    use grapevine_store::queries::users;
    use grapevine_test_utils::{MockChat, MockDelivery, MockTelegram};

    struct Fixture {
        db: Database,
        telegram: MockTelegram,
        chat: Arc<MockChat>,
        delivery: Arc<MockDelivery>,
        monitor: Arc<MentionMonitor>,
        user: User,
    }

    async fn fixture(responses: Vec<String>) -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let user = users::upsert(&db, 42, Some("alice"), None).await.unwrap();
        let telegram = MockTelegram::new();
        telegram.authorize(42);
        let chat = Arc::new(MockChat::with_responses(responses));
        let delivery = Arc::new(MockDelivery::new());
        let monitor = Arc::new(MentionMonitor::new(
            db.clone(),
            chat.clone(),
            delivery.clone(),
            8,
        ));
        Fixture {
            db,
            telegram,
            chat,
            delivery,
            monitor,
            user,
        }
    }

    async fn client_for(f: &Fixture) -> Arc<dyn TelegramClient> {
        f.telegram
            .connect(
                42,
                &TelegramCredentials {
                    api_id: 1,
                    api_hash: "hash".to_string(),
                    phone: None,
                },
                Path::new("/nonexistent"),
            )
            .await
            .unwrap()
    }

    fn group_message(id: i64, sender_id: i64, text: &str, usernames: Vec<&str>) -> GroupMessage {
        GroupMessage {
            chat_id: -100,
            chat_title: "Rust Chat".to_string(),
            message_id: id,
            sender_id,
            sender_username: Some("bob".to_string()),
            text: text.to_string(),
            posted_at: Utc::now(),
            mention_usernames: usernames.into_iter().map(str::to_string).collect(),
            mention_user_ids: vec![],
        }
    }

    async fn wait_for_mention(db: &Database, user_id: i64) -> grapevine_store::GroupMention {
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let mentions = groups::recent_mentions(db, user_id, 10).await.unwrap();
            if let Some(mention) = mentions.into_iter().next() {
                return mention;
            }
        }
        panic!("mention never captured");
    }

    #[tokio::test]
    async fn mention_is_captured_summarized_and_delivered() {
        let f = fixture(vec![
            r#"{"summary": "Обсуждают релиз, ждут твоего ревью.",
                "reason": "просят ревью", "urgency": "high"}"#
                .to_string(),
        ])
        .await;
        let client = client_for(&f).await;
        let handle = f
            .monitor
            .start_for_user(client, &f.user)
            .await
            .unwrap()
            .unwrap();

        // History for the context window, then the live mention.
        f.telegram.add_group_history(
            -100,
            (1..=4).map(|i| group_message(i, 7, &format!("m{i}"), vec![])).collect(),
        );
        f.telegram
            .inject_group_message(group_message(5, 7, "@alice глянь PR", vec!["alice"]));

        let mention = wait_for_mention(&f.db, f.user.id).await;
        assert!(mention.context.contains("релиз"));
        assert_eq!(mention.urgency, Urgency::High);
        assert_eq!(mention.reason.as_deref(), Some("просят ревью"));
        assert!(mention.notified);

        let delivered = f.delivery.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind, NoticeKind::MentionAlert);
        assert!(delivered[0].body.contains("Rust Chat"));

        // The summarizer saw the context window with the mention marked.
        let requests = f.chat.requests().await;
        assert!(requests[0].messages[0].content.contains(">> [bob] @alice глянь PR"));
        handle.stop();
    }

    #[tokio::test]
    async fn unrelated_messages_are_ignored() {
        let f = fixture(vec![]).await;
        let client = client_for(&f).await;
        let handle = f
            .monitor
            .start_for_user(client, &f.user)
            .await
            .unwrap()
            .unwrap();

        f.telegram
            .inject_group_message(group_message(1, 7, "просто болтаем", vec![]));
        // Own messages never count, even when self-referencing.
        f.telegram
            .inject_group_message(group_message(2, 42, "я @alice", vec!["alice"]));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(groups::recent_mentions(&f.db, f.user.id, 10)
            .await
            .unwrap()
            .is_empty());
        assert!(f.delivery.delivered().await.is_empty());
        handle.stop();
    }

    #[tokio::test]
    async fn entity_id_mentions_match_without_username() {
        let f = fixture(vec![
            r#"{"summary": "s", "reason": null, "urgency": "low"}"#.to_string(),
        ])
        .await;
        let client = client_for(&f).await;
        let handle = f
            .monitor
            .start_for_user(client, &f.user)
            .await
            .unwrap()
            .unwrap();

        let mut message = group_message(9, 7, "посмотри это", vec![]);
        message.mention_user_ids = vec![42];
        f.telegram.inject_group_message(message);

        let mention = wait_for_mention(&f.db, f.user.id).await;
        assert_eq!(mention.urgency, Urgency::Low);
        handle.stop();
    }

    #[tokio::test]
    async fn summarizer_outage_stores_the_raw_window() {
        let f = fixture(vec![]).await;
        f.chat.fail_next().await;
        let client = client_for(&f).await;
        let handle = f
            .monitor
            .start_for_user(client, &f.user)
            .await
            .unwrap()
            .unwrap();

        f.telegram
            .inject_group_message(group_message(3, 7, "@alice срочно", vec!["alice"]));

        let mention = wait_for_mention(&f.db, f.user.id).await;
        assert!(mention.context.contains("@alice срочно"));
        assert_eq!(mention.urgency, Urgency::Medium);
        handle.stop();
    }

    #[tokio::test]
    async fn disabled_users_are_not_monitored() {
        let mut f = fixture(vec![]).await;
        users::set_feature_flags(
            &f.db,
            42,
            &FeatureFlags {
                mentions_enabled: Some(false),
                ..FeatureFlags::default()
            },
        )
        .await
        .unwrap();
        f.user = users::get_by_telegram_id(&f.db, 42).await.unwrap().unwrap();

        let client = client_for(&f).await;
        let handle = f.monitor.start_for_user(client, &f.user).await.unwrap();
        assert!(handle.is_none());
    }

    #[test]
    fn queue_overflow_drops_the_oldest() {
        let mut queue = VecDeque::new();
        for i in 1..=3 {
            let dropped = push_pending(&mut queue, group_message(i, 7, "m", vec![]), 2);
            assert_eq!(dropped, i > 2);
        }
        let ids: Vec<i64> = queue.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![2, 3], "oldest entry must be dropped first");
    }

    #[test]
    fn summary_parsing_tolerates_fences_and_prose() {
        let parsed = parse_summary(
            "```json\n{\"summary\": \"s\", \"reason\": \"r\", \"urgency\": \"high\"}\n```",
        );
        assert_eq!(parsed.summary, "s");
        assert_eq!(parsed.urgency.as_deref(), Some("high"));

        let garbage = parse_summary("no json here");
        assert!(garbage.summary.is_empty());
    }
}
