// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request handlers for the control surface.
//!
//! Telegram-bound operations never run here: they are submitted to the
//! ingestion loop through the fabric handle and awaited, because every
//! client session is pinned to that loop. Timestamps in responses are
//! rendered in the configured local timezone; storage stays UTC.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use grapevine_core::GrapevineError;
use grapevine_store::queries::{channels, posts, users};

use crate::server::GatewayState;

/// Error envelope for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps platform errors onto HTTP statuses: validation to 400, missing
/// authorization to 401, rate limits to 429, the rest to 500.
pub struct ApiError(pub GrapevineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GrapevineError::Validation(_) => StatusCode::BAD_REQUEST,
            GrapevineError::AuthRequired { .. } => StatusCode::UNAUTHORIZED,
            GrapevineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<GrapevineError> for ApiError {
    fn from(e: GrapevineError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub auth_status: String,
    pub tier: String,
    pub retention_days: u32,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ChannelSummary {
    pub channel_username: String,
    pub title: Option<String>,
    pub active: bool,
    pub last_parsed_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostSummary {
    pub id: i64,
    pub channel_id: i64,
    pub telegram_message_id: i64,
    pub text: String,
    pub url: Option<String>,
    pub views: Option<i64>,
    pub posted_at: String,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ParseResponse {
    pub posts_added: usize,
    pub channels_processed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ParseAllResponse {
    pub users_processed: usize,
    pub posts_added: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    #[serde(default = "default_hours_back")]
    pub hours_back: i64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_hours_back() -> i64 {
    24
}

fn default_limit() -> usize {
    50
}

fn render_local(state: &GatewayState, ts: DateTime<Utc>) -> String {
    ts.with_timezone(&state.timezone)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Prometheus text rendering of all collected metrics.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed\n",
        )
            .into_response(),
    }
}

pub async fn get_users(
    State(state): State<GatewayState>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let all = users::list_all(&state.db).await?;
    let out = all
        .into_iter()
        .map(|u| UserSummary {
            telegram_id: u.telegram_id,
            username: u.username,
            auth_status: u.auth_status.to_string(),
            tier: u.tier.to_string(),
            retention_days: u.retention_days,
            created_at: render_local(&state, u.created_at),
        })
        .collect();
    Ok(Json(out))
}

pub async fn get_user_channels(
    State(state): State<GatewayState>,
    Path(telegram_id): Path<i64>,
) -> Result<Json<Vec<ChannelSummary>>, ApiError> {
    let user = users::get_by_telegram_id(&state.db, telegram_id)
        .await?
        .ok_or_else(|| GrapevineError::Validation(format!("unknown user {telegram_id}")))?;
    let pairs = channels::all_subscriptions(&state.db, user.id).await?;
    let out = pairs
        .into_iter()
        .map(|(subscription, channel)| ChannelSummary {
            channel_username: channel.channel_username,
            title: channel.title,
            active: subscription.active,
            last_parsed_at: subscription
                .last_parsed_at
                .map(|ts| render_local(&state, ts)),
        })
        .collect();
    Ok(Json(out))
}

pub async fn get_user_posts(
    State(state): State<GatewayState>,
    Path(telegram_id): Path<i64>,
    Query(query): Query<PostsQuery>,
) -> Result<Json<Vec<PostSummary>>, ApiError> {
    if query.hours_back <= 0 || query.hours_back > 24 * 365 {
        return Err(GrapevineError::Validation("hours_back out of range".into()).into());
    }
    let user = users::get_by_telegram_id(&state.db, telegram_id)
        .await?
        .ok_or_else(|| GrapevineError::Validation(format!("unknown user {telegram_id}")))?;
    let since = Utc::now() - Duration::hours(query.hours_back);
    let rows = posts::recent(&state.db, user.id, since, query.limit.min(500)).await?;
    let out = rows
        .into_iter()
        .map(|p| PostSummary {
            id: p.id,
            channel_id: p.channel_id,
            telegram_message_id: p.telegram_message_id,
            text: p.text,
            url: p.url,
            views: p.views,
            posted_at: render_local(&state, p.posted_at),
            tags: p.tags,
        })
        .collect();
    Ok(Json(out))
}

/// Trigger ingestion for one user, on the ingestion loop.
pub async fn post_parse_user(
    State(state): State<GatewayState>,
    Path(telegram_id): Path<i64>,
) -> Result<Json<ParseResponse>, ApiError> {
    let parser = Arc::clone(&state.parser);
    let report = state
        .fabric
        .submit(move |ctx| async move { parser.parse_user(&ctx.registry, telegram_id).await })
        .await??;
    Ok(Json(ParseResponse {
        posts_added: report.posts_added,
        channels_processed: report.channels_processed,
        errors: report.errors,
    }))
}

/// Trigger a full parse-all pass, on the ingestion loop.
pub async fn post_parse_all(
    State(state): State<GatewayState>,
) -> Result<Json<ParseAllResponse>, ApiError> {
    let parser = Arc::clone(&state.parser);
    let report = state
        .fabric
        .submit(move |ctx| async move { parser.parse_all(&ctx.registry).await })
        .await?;
    Ok(Json(ParseAllResponse {
        users_processed: report.users_processed,
        posts_added: report.posts_added,
        errors: report.errors,
    }))
}
