// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery surfaces for digests and mention alerts.
//!
//! The production surface is the Telegram Bot API (`sendMessage` with the
//! parse mode matching the rendered format). Without a bot token the
//! notices are logged instead, so a partially configured deployment still
//! shows what it would have sent.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use grapevine_core::GrapevineError;
use grapevine_core::traits::DeliverySurface;
use grapevine_core::types::{OutboundNotice, RenderFormat};

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends notices through the Telegram Bot API.
pub struct BotApiDelivery {
    client: reqwest::Client,
    endpoint: String,
}

impl BotApiDelivery {
    pub fn new(token: &str) -> Result<Self, GrapevineError> {
        Self::with_base_url("https://api.telegram.org", token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> Result<Self, GrapevineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GrapevineError::Provider {
                message: format!("failed to build delivery client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{token}/sendMessage", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl DeliverySurface for BotApiDelivery {
    async fn deliver(&self, notice: OutboundNotice) -> Result<(), GrapevineError> {
        let mut payload = serde_json::json!({
            "chat_id": notice.telegram_id,
            "text": notice.body,
        });
        match notice.format {
            RenderFormat::Markdown => payload["parse_mode"] = "Markdown".into(),
            RenderFormat::Html => payload["parse_mode"] = "HTML".into(),
            RenderFormat::Plain => {}
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GrapevineError::Transient {
                message: format!("delivery request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GrapevineError::RateLimited {
                wait: Duration::from_secs(30),
            });
        }
        if !status.is_success() {
            return Err(GrapevineError::transient(format!(
                "delivery endpoint returned {status}"
            )));
        }
        let body: BotApiResponse = response.json().await.map_err(|e| GrapevineError::Transient {
            message: format!("unparseable delivery response: {e}"),
            source: Some(Box::new(e)),
        })?;
        if !body.ok {
            return Err(GrapevineError::transient(format!(
                "delivery rejected: {}",
                body.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// Logging stand-in used when no bot token is configured.
pub struct LogDelivery;

#[async_trait]
impl DeliverySurface for LogDelivery {
    async fn deliver(&self, notice: OutboundNotice) -> Result<(), GrapevineError> {
        info!(
            telegram_id = notice.telegram_id,
            kind = ?notice.kind,
            bytes = notice.body.len(),
            "delivery surface not configured, notice logged"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapevine_core::types::NoticeKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notice(format: RenderFormat) -> OutboundNotice {
        OutboundNotice {
            telegram_id: 42,
            kind: NoticeKind::Digest,
            format,
            body: "# Дайджест".to_string(),
        }
    }

    #[tokio::test]
    async fn send_message_carries_chat_id_and_parse_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": 42,
                "parse_mode": "Markdown"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let delivery = BotApiDelivery::with_base_url(&server.uri(), "TOKEN").unwrap();
        delivery.deliver(notice(RenderFormat::Markdown)).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_sends_surface_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"ok": false, "description": "chat not found"}),
            ))
            .mount(&server)
            .await;

        let delivery = BotApiDelivery::with_base_url(&server.uri(), "TOKEN").unwrap();
        let err = delivery.deliver(notice(RenderFormat::Plain)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn http_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let delivery = BotApiDelivery::with_base_url(&server.uri(), "TOKEN").unwrap();
        let err = delivery.deliver(notice(RenderFormat::Plain)).await.unwrap_err();
        assert!(matches!(err, GrapevineError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn log_delivery_always_accepts() {
        LogDelivery.deliver(notice(RenderFormat::Html)).await.unwrap();
    }
}
