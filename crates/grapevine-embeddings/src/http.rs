// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP embedding provider for the primary OpenAI-compatible endpoint.
//!
//! Transient failures (429, 5xx) retry with exponential backoff, bounded
//! at three attempts. Serialization of requests happens one level up in
//! the service: the endpoint is single-request limited.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use async_trait::async_trait;
use grapevine_core::GrapevineError;
use grapevine_core::traits::EmbeddingProvider;

const MAX_ATTEMPTS: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Embedding client for `{base_url}/v1/embeddings`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_chunk_tokens: usize,
    overlap_tokens: usize,
    backoff_base: Duration,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        max_chunk_tokens: usize,
        overlap_tokens: usize,
        timeout: Duration,
    ) -> Result<Self, GrapevineError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                GrapevineError::Config(format!("invalid API key header value: {e}"))
            })?;
            headers.insert("authorization", value);
        }
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
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            max_chunk_tokens,
            overlap_tokens,
            backoff_base: Duration::from_secs(2),
        })
    }

    #[cfg(test)]
    pub fn with_fast_backoff(mut self) -> Self {
        self.backoff_base = Duration::from_millis(10);
        self
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(4);
        (self.backoff_base * factor).min(MAX_BACKOFF)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn name(&self) -> &str {
        "primary"
    }

    fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens
    }

    fn overlap_tokens(&self) -> usize {
        self.overlap_tokens
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GrapevineError> {
        let body = json!({ "model": self.model, "input": text });

        let mut last_error: Option<GrapevineError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let wait = self.backoff_for(attempt - 1);
                warn!(attempt, wait_ms = wait.as_millis() as u64,
                    "retrying embedding after transient error");
                tokio::time::sleep(wait).await;
            }

            let response = match self.client.post(&self.endpoint).json(&body).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(GrapevineError::Transient {
                        message: format!("embedding request failed: {e}"),
                        source: Some(Box::new(e)),
                    });
                    continue;
                }
            };

            let status = response.status();
            debug!(status = %status, attempt, "embedding response");

            if status.is_success() {
                let parsed: EmbeddingResponse =
                    response.json().await.map_err(|e| GrapevineError::Provider {
                        message: format!("failed to parse embedding response: {e}"),
                        source: Some(Box::new(e)),
                    })?;
                return parsed
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| GrapevineError::Provider {
                        message: "embedding response had no data".to_string(),
                        source: None,
                    });
            }

            let transient = status.as_u16() == 429 || status.is_server_error();
            let body_text = response.text().await.unwrap_or_default();
            let error = GrapevineError::Provider {
                message: format!("embedding endpoint returned {status}: {body_text}"),
                source: None,
            };
            if !transient {
                return Err(error);
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| GrapevineError::Provider {
            message: "embedding failed after retries".to_string(),
            source: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer) -> HttpEmbedder {
        HttpEmbedder::new(
            &server.uri(),
            Some("key"),
            "text-embedding-3-small",
            1024,
            128,
            Duration::from_secs(5),
        )
        .unwrap()
        .with_fast_backoff()
    }

    #[tokio::test]
    async fn embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer key"))
            .and(body_partial_json(
                serde_json::json!({"model": "text-embedding-3-small", "input": "hello"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let vector = embedder(&server).embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let vector = embedder(&server).embed("x").await.unwrap();
        assert_eq!(vector, vec![1.0]);
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_429() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        assert!(embedder(&server).embed("x").await.is_err());
    }

    #[tokio::test]
    async fn bad_request_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        assert!(embedder(&server).embed("x").await.is_err());
    }

    #[test]
    fn chunk_window_is_exposed() {
        let embedder = HttpEmbedder::new(
            "http://localhost",
            None,
            "m",
            1024,
            128,
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(embedder.max_chunk_tokens(), 1024);
        assert_eq!(embedder.overlap_tokens(), 128);
        assert_eq!(embedder.name(), "primary");
    }
}
