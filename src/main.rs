// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fearless API Server
//!
//! Backend for the game's companion site: balances, reward mail, the item
//! store, accounts, the forum and play-time tracking.

use fearless_server::{
    config::Config,
    db::FirestoreDb,
    services::{FirebaseVerifier, IdentityAdmin, Notifier},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Fearless API");

    // Initialize Firestore database
    let db = FirestoreDb::new(&config.gcp_project_id).await?;

    let id_token_verifier = Arc::new(FirebaseVerifier::new(&config)?);
    let identity_admin = IdentityAdmin::new(&config)?;
    let notifier = Notifier::new(&config)?;
    tracing::info!(
        project = %config.gcp_project_id,
        longpoll_max_secs = config.longpoll_max.as_secs(),
        "Services initialized"
    );

    // Build shared state
    let state = Arc::new(AppState::new(
        config.clone(),
        db,
        id_token_verifier,
        identity_admin,
        notifier,
    ));

    // Build router
    let app = fearless_server::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fearless_server=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
