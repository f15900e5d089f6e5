// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery surface trait.
//!
//! Digests and mention alerts are handed to an external delivery surface
//! (the bot process). The core only knows this contract.

use async_trait::async_trait;

use crate::error::GrapevineError;
use crate::types::OutboundNotice;

/// Sink for rendered notifications.
#[async_trait]
pub trait DeliverySurface: Send + Sync {
    /// Deliver one notice to its user. Transient failures may be retried by
    /// the caller with backoff.
    async fn deliver(&self, notice: OutboundNotice) -> Result<(), GrapevineError>;
}
