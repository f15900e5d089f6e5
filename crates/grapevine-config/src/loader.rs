// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Merge order: compiled defaults < `/etc/grapevine/grapevine.toml` <
//! `~/.config/grapevine/grapevine.toml` < `./grapevine.toml` <
//! `GRAPEVINE_*` environment variables.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::GrapevineConfig;

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<GrapevineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(GrapevineConfig::default()))
        .merge(Toml::file("/etc/grapevine/grapevine.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("grapevine/grapevine.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("grapevine.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from inline TOML only (tests and tooling).
pub fn load_config_from_str(toml_content: &str) -> Result<GrapevineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(GrapevineConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from an explicit file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<GrapevineConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(GrapevineConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Env var provider with explicit section mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` so underscore-containing
/// key names stay unambiguous: `GRAPEVINE_VAULT_ENCRYPTION_KEY` maps to
/// `vault.encryption_key`, not `vault.encryption.key`.
fn env_provider() -> Env {
    Env::prefixed("GRAPEVINE_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("app_", "app.", 1)
            .replacen("vault_", "vault.", 1)
            .replacen("telegram_", "telegram.", 1)
            .replacen("database_", "database.", 1)
            .replacen("vector_", "vector.", 1)
            .replacen("graph_", "graph.", 1)
            .replacen("cache_", "cache.", 1)
            .replacen("llm_", "llm.", 1)
            .replacen("embeddings_", "embeddings.", 1)
            .replacen("parser_", "parser.", 1)
            .replacen("retention_", "retention.", 1)
            .replacen("mentions_", "mentions.", 1)
            .replacen("delivery_", "delivery.", 1)
            .replacen("enrichment_", "enrichment.", 1)
            .replacen("features_", "features.", 1);
        mapped.into()
    })
}

/// Validate settings that must be correct before any subsystem starts.
///
/// Missing encryption key and an unknown timezone are fatal; everything
/// else has workable defaults.
pub fn validate(config: &GrapevineConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.vault.encryption_key.is_none() {
        errors.push(
            "vault.encryption_key is not set (GRAPEVINE_VAULT_ENCRYPTION_KEY); refusing to start"
                .to_string(),
        );
    }

    if config.app.timezone.parse::<chrono_tz::Tz>().is_err() {
        errors.push(format!(
            "app.timezone '{}' is not a known IANA timezone",
            config.app.timezone
        ));
    }

    if parse_cleanup_time(&config.retention.cleanup_time).is_none() {
        errors.push(format!(
            "retention.cleanup_time '{}' is not HH:MM",
            config.retention.cleanup_time
        ));
    }

    if !(1..=365).contains(&config.retention.default_days) {
        errors.push(format!(
            "retention.default_days {} outside 1..=365",
            config.retention.default_days
        ));
    }

    if config.embeddings.primary_overlap_tokens >= config.embeddings.primary_max_tokens {
        errors.push("embeddings.primary_overlap_tokens must be < primary_max_tokens".to_string());
    }
    if config.embeddings.fallback_overlap_tokens >= config.embeddings.fallback_max_tokens {
        errors.push("embeddings.fallback_overlap_tokens must be < fallback_max_tokens".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Parse `HH:MM` into (hour, minute).
pub fn parse_cleanup_time(raw: &str) -> Option<(u32, u32)> {
    let (h, m) = raw.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_except_missing_key() {
        let config = load_config_from_str("").unwrap();
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("encryption_key"));
    }

    #[test]
    fn full_config_parses() {
        let config = load_config_from_str(
            r#"
            [vault]
            encryption_key = "aGVsbG8aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa="

            [telegram]
            api_id = 12345
            api_hash = "abcdef"

            [parser]
            interval_minutes = 15
            max_messages_per_channel = 100

            [retention]
            default_days = 30
            cleanup_time = "04:00"

            [features]
            hybrid_search = false
        "#,
        )
        .unwrap();

        assert!(validate(&config).is_ok());
        assert_eq!(config.parser.interval_minutes, 15);
        assert_eq!(config.telegram.api_id, Some(12345));
        assert!(!config.features.hybrid_search);
        assert_eq!(config.retention.cleanup_time, "04:00");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = load_config_from_str(
            r#"
            [parser]
            intervall_minutes = 15
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn env_override_maps_sections() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("GRAPEVINE_VAULT_ENCRYPTION_KEY", "deadbeef");
            jail.set_env("GRAPEVINE_PARSER_INTERVAL_MINUTES", "5");
            let config: GrapevineConfig = Figment::new()
                .merge(Serialized::defaults(GrapevineConfig::default()))
                .merge(env_provider())
                .extract()?;
            assert_eq!(config.vault.encryption_key.as_deref(), Some("deadbeef"));
            assert_eq!(config.parser.interval_minutes, 5);
            Ok(())
        });
    }

    #[test]
    fn cleanup_time_parsing() {
        assert_eq!(parse_cleanup_time("03:30"), Some((3, 30)));
        assert_eq!(parse_cleanup_time("23:59"), Some((23, 59)));
        assert_eq!(parse_cleanup_time("24:00"), None);
        assert_eq!(parse_cleanup_time("3"), None);
        assert_eq!(parse_cleanup_time("ab:cd"), None);
    }

    #[test]
    fn invalid_timezone_is_fatal() {
        let mut config = GrapevineConfig::default();
        config.vault.encryption_key = Some("key".to_string());
        config.app.timezone = "Mars/Olympus".to_string();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("timezone")));
    }

    #[test]
    fn cache_url_rendering() {
        let mut config = GrapevineConfig::default();
        assert_eq!(config.cache.url(), "redis://127.0.0.1:6379");
        config.cache.password = Some("s3cret".to_string());
        assert_eq!(config.cache.url(), "redis://:s3cret@127.0.0.1:6379");
    }
}
