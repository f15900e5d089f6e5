// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for OpenAI-compatible chat completion endpoints.
//!
//! One implementation serves both roles: the primary endpoint (chat and
//! embeddings behind one base URL) and the secondary fallback provider.
//! Transient errors (429, 5xx) are retried with exponential backoff,
//! bounded at three attempts.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use async_trait::async_trait;
use grapevine_core::GrapevineError;
use grapevine_core::traits::ChatProvider;
use grapevine_core::types::{ChatRequest, ChatResponse};

/// Maximum completion attempts (1 initial + 2 retries).
const MAX_ATTEMPTS: u32 = 3;
/// Backoff cap between attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [grapevine_core::types::ChatMessage],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Chat client for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatClient {
    client: reqwest::Client,
    name: String,
    endpoint: String,
    model: String,
    backoff_base: Duration,
}

impl HttpChatClient {
    /// Build a client for `{base_url}/v1/chat/completions`.
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, GrapevineError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                GrapevineError::Config(format!("invalid API key header value: {e}"))
            })?;
            headers.insert("authorization", value);
        }
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| GrapevineError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            name: name.to_string(),
            endpoint: format!(
                "{}/v1/chat/completions",
                base_url.trim_end_matches('/')
            ),
            model: model.to_string(),
            backoff_base: Duration::from_secs(2),
        })
    }

    /// Shrink the retry backoff (tests only).
    #[cfg(test)]
    pub fn with_fast_backoff(mut self) -> Self {
        self.backoff_base = Duration::from_millis(10);
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        // 2s, 4s, 8s… capped at 10s.
        let factor = 1u32 << attempt.min(4);
        (self.backoff_base * factor).min(MAX_BACKOFF)
    }
}

fn is_transient(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

#[async_trait]
impl ChatProvider for HttpChatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, GrapevineError> {
        let body = CompletionBody {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut last_error: Option<GrapevineError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let wait = self.backoff_for(attempt - 1);
                warn!(provider = %self.name, attempt, wait_ms = wait.as_millis() as u64,
                    "retrying completion after transient error");
                tokio::time::sleep(wait).await;
            }

            let response = match self.client.post(&self.endpoint).json(&body).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(GrapevineError::Transient {
                        message: format!("HTTP request failed: {e}"),
                        source: Some(Box::new(e)),
                    });
                    continue;
                }
            };

            let status = response.status();
            debug!(provider = %self.name, status = %status, attempt, "completion response");

            if status.is_success() {
                let parsed: CompletionResponse =
                    response.json().await.map_err(|e| GrapevineError::Provider {
                        message: format!("failed to parse completion response: {e}"),
                        source: Some(Box::new(e)),
                    })?;
                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| GrapevineError::Provider {
                        message: "completion response had no choices".to_string(),
                        source: None,
                    })?;
                let model = if parsed.model.is_empty() {
                    self.model.clone()
                } else {
                    parsed.model
                };
                return Ok(ChatResponse { content, model });
            }

            let transient = is_transient(status);
            let body_text = response.text().await.unwrap_or_default();
            let error = GrapevineError::Provider {
                message: format!("{} returned {status}: {body_text}", self.name),
                source: None,
            };
            if !transient {
                return Err(error);
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| GrapevineError::Provider {
            message: format!("{}: completion failed after retries", self.name),
            source: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapevine_core::types::ChatMessage;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user("Привет")],
            max_tokens: 256,
            temperature: Some(0.2),
        }
    }

    fn client(server: &MockServer) -> HttpChatClient {
        HttpChatClient::new(
            "primary",
            &server.uri(),
            Some("test-key"),
            "gpt-4o-mini",
            Duration::from_secs(5),
        )
        .unwrap()
        .with_fast_backoff()
    }

    fn ok_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "cmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn complete_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("Здравствуйте!")))
            .mount(&server)
            .await;

        let response = client(&server).complete(request()).await.unwrap();
        assert_eq!(response.content, "Здравствуйте!");
        assert_eq!(response.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("after retry")))
            .mount(&server)
            .await;

        let response = client(&server).complete(request()).await.unwrap();
        assert_eq!(response.content, "after retry");
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).complete(request()).await.unwrap_err();
        assert!(err.to_string().contains("503"), "got: {err}");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).complete(request()).await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn empty_choices_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": [], "model": "m"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).complete(request()).await.unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let client = HttpChatClient::new(
            "p",
            "http://localhost",
            None,
            "m",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.backoff_for(0), Duration::from_secs(2));
        assert_eq!(client.backoff_for(1), Duration::from_secs(4));
        assert_eq!(client.backoff_for(2), Duration::from_secs(8));
        assert_eq!(client.backoff_for(3), Duration::from_secs(10));
        assert_eq!(client.backoff_for(9), Duration::from_secs(10));
    }
}
