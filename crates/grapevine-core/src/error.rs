// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Grapevine platform.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across all Grapevine gateways and services.
///
/// Variants map the platform's error-policy table: `Validation` is never
/// retried, `Transient` is retried with backoff inside the failing
/// component, `RateLimited` carries the server-supplied wait and is retried
/// by the scheduler, `Config` and `Vault` are fatal at startup.
#[derive(Debug, Error)]
pub enum GrapevineError {
    /// Configuration errors (invalid TOML, missing required fields). Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The user has no authorized Telegram session.
    #[error("authentication required for user {telegram_id}")]
    AuthRequired { telegram_id: i64 },

    /// Telegram or an LLM provider asked us to slow down.
    #[error("rate limited, retry after {wait:?}")]
    RateLimited { wait: Duration },

    /// Recoverable failures (5xx, network) that components retry with backoff.
    #[error("transient error: {message}")]
    Transient {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid caller input. Surfaced as 4xx, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Relational integrity violation (unique/foreign key). Item is skipped.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Relational store errors (connection, query, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Vector store errors.
    #[error("vector store error: {message}")]
    Vector { message: String },

    /// Graph store errors. Reads degrade to empty signals upstream.
    #[error("graph store error: {message}")]
    Graph { message: String },

    /// Cache errors. Callers must tolerate these as soft failures.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// LLM / embedding provider errors (API failure, bad payload).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Credential vault errors (bad key, tampered ciphertext). Key load failure is fatal.
    #[error("vault error: {0}")]
    Vault(String),

    /// Operation exceeded its configured deadline.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GrapevineError {
    /// Wrap any error as a storage failure.
    pub fn storage<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        GrapevineError::Storage {
            source: Box::new(source),
        }
    }

    /// Wrap a message as a transient failure without a source.
    pub fn transient(message: impl Into<String>) -> Self {
        GrapevineError::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// True for errors that a bounded retry loop is allowed to absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GrapevineError::Transient { .. }
                | GrapevineError::RateLimited { .. }
                | GrapevineError::Timeout { .. }
        )
    }
}
