// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Forum (notice board) routes.
//!
//! Reads are public; writes live under `/api` behind the auth middleware.

use crate::db::StoredDoc;
use crate::error::Result;
use crate::middleware::auth::AuthUser;
use crate::models::{Comment, CommentIndexEntry, Post};
use crate::routes::{encode_cursor, parse_cursor};
use crate::services::forum::MAX_PAGE_SIZE;
use crate::services::Actor;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notices", get(list_posts))
        .route("/notices/{id}", get(view_post))
        .route("/notices/{id}/comments", get(list_comments))
}

pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/notices", post(create_post))
        .route("/api/notices/mine", get(list_my_posts))
        .route("/api/notices/{id}", patch(edit_post).delete(delete_post))
        .route("/api/notices/{id}/comments", post(add_comment))
        .route(
            "/api/notices/{id}/comments/{comment_id}",
            delete(delete_comment),
        )
        .route("/api/comments/mine", get(list_my_comments))
}

fn actor(user: &AuthUser) -> Actor {
    Actor {
        user_id: user.user_id.clone(),
        email: user.email.clone(),
        is_admin: user.is_admin(),
    }
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page_size")]
    limit: u32,
    cursor: Option<String>,
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<StoredDoc<T>>,
    pub next_cursor: Option<String>,
}

impl<T> From<crate::db::Page<StoredDoc<T>>> for ListResponse<T> {
    fn from(page: crate::db::Page<StoredDoc<T>>) -> Self {
        Self {
            items: page.items,
            next_cursor: page.next_cursor.as_deref().map(encode_cursor),
        }
    }
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

// ─── Posts ───────────────────────────────────────────────────

async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageQuery>,
) -> Result<Json<ListResponse<Post>>> {
    let cursor = parse_cursor(params.cursor.as_deref())?;
    let page = state.forum.list_posts(params.limit, cursor.as_deref()).await?;
    Ok(Json(page.into()))
}

async fn list_my_posts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<PageQuery>,
) -> Result<Json<ListResponse<Post>>> {
    let cursor = parse_cursor(params.cursor.as_deref())?;
    let page = state
        .forum
        .list_my_posts(&user.user_id, params.limit, cursor.as_deref())
        .await?;
    Ok(Json(page.into()))
}

async fn view_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StoredDoc<Post>>> {
    Ok(Json(state.forum.view_post(&id).await?))
}

#[derive(Deserialize)]
struct NewPost {
    #[serde(default)]
    title: String,
    #[serde(default)]
    contents: String,
}

async fn create_post(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NewPost>,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let id = state
        .forum
        .create_post(&actor(&user), &body.title, &body.contents)
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[derive(Deserialize)]
struct PostEdit {
    title: Option<String>,
    contents: Option<String>,
}

async fn edit_post(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<PostEdit>,
) -> Result<StatusCode> {
    state
        .forum
        .edit_post(
            &actor(&user),
            &id,
            body.title.as_deref(),
            body.contents.as_deref(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_post(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.forum.delete_post(&actor(&user), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Comments ────────────────────────────────────────────────

async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StoredDoc<Comment>>>> {
    Ok(Json(state.forum.list_comments(&id).await?))
}

async fn list_my_comments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<PageQuery>,
) -> Result<Json<ListResponse<CommentIndexEntry>>> {
    let cursor = parse_cursor(params.cursor.as_deref())?;
    let page = state
        .forum
        .list_my_comments(&user.user_id, params.limit, cursor.as_deref())
        .await?;
    Ok(Json(page.into()))
}

#[derive(Deserialize)]
struct NewComment {
    #[serde(default)]
    contents: String,
}

async fn add_comment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<NewComment>,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let comment_id = state
        .forum
        .add_comment(&actor(&user), &id, &body.contents)
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: comment_id })))
}

async fn delete_comment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, comment_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state
        .forum
        .delete_comment(&actor(&user), &id, &comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
