// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport seam for the user-mode Telegram client.
//!
//! The MTProto wire protocol lives in an external adapter that implements
//! [`TelegramConnector`]; this module provides the placeholder used when
//! no adapter is wired into the build. Every connection attempt reports
//! the missing adapter, so the rest of the platform (gateway, scheduler,
//! retrieval) keeps running on already-ingested data.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use grapevine_core::GrapevineError;
use grapevine_core::traits::{QrLogin, QrWaiter, TelegramClient, TelegramConnector};
use grapevine_core::types::TelegramCredentials;

/// Connector used when no MTProto adapter is compiled in.
pub struct UnconfiguredTelegram;

fn missing_adapter() -> GrapevineError {
    GrapevineError::Config(
        "no Telegram transport adapter is wired into this build; \
         ingestion and QR login are unavailable"
            .into(),
    )
}

#[async_trait]
impl TelegramConnector for UnconfiguredTelegram {
    async fn connect(
        &self,
        _telegram_id: i64,
        _credentials: &TelegramCredentials,
        _session_path: &Path,
    ) -> Result<Arc<dyn TelegramClient>, GrapevineError> {
        Err(missing_adapter())
    }

    async fn begin_qr_login(
        &self,
        _credentials: &TelegramCredentials,
    ) -> Result<(QrLogin, Box<dyn QrWaiter>), GrapevineError> {
        Err(missing_adapter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_operation_reports_the_missing_adapter() {
        let connector = UnconfiguredTelegram;
        let credentials = TelegramCredentials {
            api_id: 1,
            api_hash: "hash".to_string(),
            phone: None,
        };
        let err = connector
            .connect(1, &credentials, Path::new("/tmp/u.session"))
            .await
            .unwrap_err();
        assert!(matches!(err, GrapevineError::Config(_)));
        assert!(connector.begin_qr_login(&credentials).await.is_err());
    }
}
