// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Public catalog listing.

use crate::error::Result;
use crate::models::CatalogEntry;
use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/items", get(list_items))
}

/// All three catalogs. A missing catalog document lists as empty.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    pub events: Vec<CatalogEntry>,
    pub web_items: Vec<CatalogEntry>,
    pub game_items: Vec<CatalogEntry>,
}

async fn list_items(State(state): State<Arc<AppState>>) -> Result<Json<CatalogResponse>> {
    let (events, web_items, game_items) = state.purchases.catalogs().await?;
    tracing::debug!(
        events = events.len(),
        web = web_items.len(),
        game = game_items.len(),
        "Catalogs loaded"
    );

    Ok(Json(CatalogResponse {
        events,
        web_items,
        game_items,
    }))
}
