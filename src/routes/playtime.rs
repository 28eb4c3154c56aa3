// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Play-time routes, including the long-poll change notification.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::middleware::security::longpoll_headers;
use crate::services::WaitOutcome;
use crate::time_utils::format_hms;
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/playtime", get(get_playtime))
        .route(
            "/playtime/longpoll",
            get(longpoll).layer(middleware::from_fn(longpoll_headers)),
        )
        .route("/playtime/increment", post(increment))
        .route("/playtime/touch", post(touch))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PlaytimeResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub playtime: u64,
    /// `HH:MM:SS`
    pub formatted: String,
}

impl From<u64> for PlaytimeResponse {
    fn from(playtime: u64) -> Self {
        Self {
            playtime,
            formatted: format_hms(playtime),
        }
    }
}

async fn get_playtime(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<PlaytimeResponse>> {
    let playtime = state.playtime.get(&user.user_id).await?;
    Ok(Json(playtime.into()))
}

#[derive(Deserialize)]
struct LongpollQuery {
    since: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ChangedResponse {
    pub status: &'static str,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub playtime: u64,
}

/// Hold the request until play time moves away from `since`.
///
/// Answers 200 with the new value, or 204 once the wait runs out.
async fn longpoll(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<LongpollQuery>,
) -> Result<Response> {
    let since = params
        .since
        .ok_or_else(|| AppError::InvalidPayload("'since' is required".to_string()))?;
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config.longpoll_max);

    let outcome = state
        .playtime
        .await_change(&user.user_id, since, timeout)
        .await?;

    Ok(match outcome {
        WaitOutcome::Changed(playtime) => Json(ChangedResponse {
            status: "changed",
            playtime,
        })
        .into_response(),
        WaitOutcome::Timeout => StatusCode::NO_CONTENT.into_response(),
    })
}

#[derive(Deserialize)]
struct IncrementRequest {
    amount: u64,
}

async fn increment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<IncrementRequest>,
) -> Result<Json<PlaytimeResponse>> {
    let playtime = state.playtime.increment(&user.user_id, body.amount).await?;
    tracing::debug!(user_id = %user.user_id, amount = body.amount, playtime, "Play time recorded");
    Ok(Json(playtime.into()))
}

async fn touch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode> {
    state.playtime.touch(&user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
