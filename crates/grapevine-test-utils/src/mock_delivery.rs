// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capturing delivery surface for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use grapevine_core::GrapevineError;
use grapevine_core::traits::DeliverySurface;
use grapevine_core::types::OutboundNotice;

/// Records delivered notices and can fail the first N attempts, for
/// retry-path tests.
pub struct MockDelivery {
    delivered: Arc<Mutex<Vec<OutboundNotice>>>,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

impl MockDelivery {
    pub fn new() -> Self {
        Self {
            delivered: Arc::new(Mutex::new(Vec::new())),
            failures_remaining: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` delivery attempts with a transient error.
    pub fn fail_attempts(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub async fn delivered(&self) -> Vec<OutboundNotice> {
        self.delivered.lock().await.clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MockDelivery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliverySurface for MockDelivery {
    async fn deliver(&self, notice: OutboundNotice) -> Result<(), GrapevineError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(GrapevineError::transient("delivery surface unavailable"));
        }
        self.delivered.lock().await.push(notice);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapevine_core::types::{NoticeKind, RenderFormat};

    fn notice() -> OutboundNotice {
        OutboundNotice {
            telegram_id: 1,
            kind: NoticeKind::Digest,
            format: RenderFormat::Markdown,
            body: "# digest".to_string(),
        }
    }

    #[tokio::test]
    async fn captures_notices() {
        let delivery = MockDelivery::new();
        delivery.deliver(notice()).await.unwrap();
        assert_eq!(delivery.delivered().await.len(), 1);
        assert_eq!(delivery.attempts(), 1);
    }

    #[tokio::test]
    async fn fails_then_recovers() {
        let delivery = MockDelivery::new();
        delivery.fail_attempts(2);
        assert!(delivery.deliver(notice()).await.is_err());
        assert!(delivery.deliver(notice()).await.is_err());
        delivery.deliver(notice()).await.unwrap();
        assert_eq!(delivery.attempts(), 3);
        assert_eq!(delivery.delivered().await.len(), 1);
    }
}
