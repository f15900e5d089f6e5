// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock chat provider with pre-scripted responses.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use grapevine_core::GrapevineError;
use grapevine_core::traits::ChatProvider;
use grapevine_core::types::{ChatRequest, ChatResponse};

/// A chat provider returning queued responses FIFO.
///
/// An empty queue yields a default "mock response". Requests are recorded
/// for prompt assertions. `fail_next` injects one provider error.
pub struct MockChat {
    responses: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue another response.
    pub async fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().await.push_back(text.into());
    }

    /// Make the next `complete` call fail.
    pub async fn fail_next(&self) {
        *self.fail_next.lock().await = true;
    }

    /// Requests seen so far (clones).
    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of completed calls.
    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

impl Default for MockChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for MockChat {
    fn name(&self) -> &str {
        "mock-chat"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, GrapevineError> {
        self.requests.lock().await.push(request);
        let mut fail = self.fail_next.lock().await;
        if *fail {
            *fail = false;
            return Err(GrapevineError::Provider {
                message: "mock chat failure".to_string(),
                source: None,
            });
        }
        let text = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| "mock response".to_string());
        Ok(ChatResponse {
            content: text,
            model: "mock-model".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![],
            max_tokens: 10,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn responses_pop_in_order_then_default() {
        let chat = MockChat::new();
        chat.push_response("first").await;
        chat.push_response("second").await;

        assert_eq!(chat.complete(request()).await.unwrap().content, "first");
        assert_eq!(chat.complete(request()).await.unwrap().content, "second");
        assert_eq!(
            chat.complete(request()).await.unwrap().content,
            "mock response"
        );
        assert_eq!(chat.call_count().await, 3);
    }

    #[tokio::test]
    async fn fail_next_injects_one_error() {
        let chat = MockChat::new();
        chat.push_response("ok").await;
        chat.fail_next().await;

        assert!(chat.complete(request()).await.is_err());
        assert_eq!(chat.complete(request()).await.unwrap().content, "ok");
    }
}
