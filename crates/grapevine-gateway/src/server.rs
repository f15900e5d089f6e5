// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Runs on the main multi-thread runtime, in a different thread than the
//! ingestion loop; the shared [`FabricHandle`] in the state is the only
//! road to Telegram-bound work.

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use chrono_tz::Tz;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use grapevine_core::GrapevineError;
use grapevine_fabric::FabricHandle;
use grapevine_ingest::Parser;
use grapevine_store::Database;

use crate::handlers;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Database,
    pub fabric: FabricHandle,
    pub parser: Arc<Parser>,
    pub timezone: Tz,
    pub start_time: Instant,
    pub prometheus: Option<PrometheusHandle>,
}

/// Bind configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// The full route table.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .route("/users", get(handlers::get_users))
        .route(
            "/users/{telegram_id}/channels",
            get(handlers::get_user_channels),
        )
        .route("/users/{telegram_id}/posts", get(handlers::get_user_posts))
        .route(
            "/users/{telegram_id}/channels/parse",
            post(handlers::post_parse_user),
        )
        .route("/parse_all_channels", post(handlers::post_parse_all))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the token is cancelled.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), GrapevineError> {
    let app = router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GrapevineError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    info!("gateway listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| GrapevineError::Internal(format!("gateway server error: {e}")))
}

/// Install the process-wide Prometheus recorder.
///
/// Only one recorder can exist per process; a second call fails.
pub fn install_metrics() -> Result<PrometheusHandle, GrapevineError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| GrapevineError::Internal(format!("failed to install metrics recorder: {e}")))
}
