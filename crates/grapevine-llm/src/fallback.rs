// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Primary-then-secondary chat fallback.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use grapevine_core::GrapevineError;
use grapevine_core::traits::ChatProvider;
use grapevine_core::types::{ChatRequest, ChatResponse};

/// Tries the primary provider, falling back to the secondary on any error.
///
/// Each provider already retries its own transients, so one failure here
/// means that provider is out for this request.
pub struct FallbackChat {
    primary: Arc<dyn ChatProvider>,
    secondary: Option<Arc<dyn ChatProvider>>,
}

impl FallbackChat {
    pub fn new(primary: Arc<dyn ChatProvider>, secondary: Option<Arc<dyn ChatProvider>>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl ChatProvider for FallbackChat {
    fn name(&self) -> &str {
        "fallback-chain"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, GrapevineError> {
        match self.primary.complete(request.clone()).await {
            Ok(response) => Ok(response),
            Err(primary_err) => match &self.secondary {
                Some(secondary) => {
                    warn!(
                        primary = self.primary.name(),
                        secondary = secondary.name(),
                        error = %primary_err,
                        "primary chat provider failed, trying secondary"
                    );
                    secondary.complete(request).await
                }
                None => Err(primary_err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedChat {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedChat {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedChat {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, GrapevineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(GrapevineError::Provider {
                    message: format!("{} down", self.name),
                    source: None,
                })
            } else {
                Ok(ChatResponse {
                    content: format!("answer from {}", self.name),
                    model: self.name.to_string(),
                })
            }
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![],
            max_tokens: 16,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn primary_success_skips_secondary() {
        let primary = ScriptedChat::new("primary", false);
        let secondary = ScriptedChat::new("secondary", false);
        let chain = FallbackChat::new(primary.clone(), Some(secondary.clone()));

        let response = chain.complete(request()).await.unwrap();
        assert_eq!(response.content, "answer from primary");
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn primary_failure_falls_back() {
        let primary = ScriptedChat::new("primary", true);
        let secondary = ScriptedChat::new("secondary", false);
        let chain = FallbackChat::new(primary, Some(secondary.clone()));

        let response = chain.complete(request()).await.unwrap();
        assert_eq!(response.content, "answer from secondary");
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_failing_returns_secondary_error() {
        let chain = FallbackChat::new(
            ScriptedChat::new("primary", true),
            Some(ScriptedChat::new("secondary", true)),
        );
        let err = chain.complete(request()).await.unwrap_err();
        assert!(err.to_string().contains("secondary down"));
    }

    #[tokio::test]
    async fn no_secondary_surfaces_primary_error() {
        let chain = FallbackChat::new(ScriptedChat::new("primary", true), None);
        let err = chain.complete(request()).await.unwrap_err();
        assert!(err.to_string().contains("primary down"));
    }
}
