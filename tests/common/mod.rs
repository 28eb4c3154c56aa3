// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::response::Response;
use fearless_server::config::Config;
use fearless_server::db::{user_doc, FirestoreDb};
use fearless_server::middleware::auth::{create_jwt, TokenKind};
use fearless_server::models::{Provider, User};
use fearless_server::routes::create_router;
use fearless_server::services::{FirebaseVerifier, IdentityAdmin, Notifier};
use fearless_server::AppState;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared secret behind the static-key ID token verifier.
#[allow(dead_code)]
pub const ID_TOKEN_SECRET: &[u8] = b"integration-id-token-secret";
#[allow(dead_code)]
pub const ID_TOKEN_KID: &str = "test-kid";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a mock database connection (offline).
#[allow(dead_code)]
pub fn test_db_offline() -> FirestoreDb {
    FirestoreDb::new_mock()
}

fn build_app(config: Config, db: FirestoreDb) -> (axum::Router, Arc<AppState>) {
    let verifier = FirebaseVerifier::new_with_static_key(
        &config,
        ID_TOKEN_KID,
        Algorithm::HS256,
        DecodingKey::from_secret(ID_TOKEN_SECRET),
    )
    .expect("static verifier");

    let state = Arc::new(AppState::new(
        config,
        db,
        Arc::new(verifier),
        IdentityAdmin::new_mock(),
        Notifier::new_log(),
    ));

    (create_router(state.clone()), state)
}

/// Create a test app over an in-memory store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    build_app(Config::test_default(), FirestoreDb::new_in_memory())
}

/// Create a test app with a custom config over an in-memory store.
#[allow(dead_code)]
pub fn create_test_app_with_config(config: Config) -> (axum::Router, Arc<AppState>) {
    build_app(config, FirestoreDb::new_in_memory())
}

/// Create a test app whose store is unreachable.
#[allow(dead_code)]
pub fn create_offline_app() -> (axum::Router, Arc<AppState>) {
    build_app(Config::test_default(), test_db_offline())
}

/// Session token for `user_id`, as the sign-in routes would issue it.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: &str, signing_key: &[u8]) -> String {
    create_jwt(user_id, None, None, TokenKind::Access, signing_key).unwrap()
}

#[allow(dead_code)]
pub fn create_admin_jwt(user_id: &str, signing_key: &[u8]) -> String {
    create_jwt(user_id, None, Some("admin"), TokenKind::Access, signing_key).unwrap()
}

/// Firebase-style ID token accepted by the test verifier.
#[allow(dead_code)]
pub fn create_id_token(uid: &str, email: &str, sign_in_provider: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let claims = serde_json::json!({
        "iss": "https://securetoken.google.com/test-project",
        "aud": "test-project",
        "sub": uid,
        "iat": now,
        "exp": now + 3600,
        "email": email,
        "firebase": {"sign_in_provider": sign_in_provider}
    });

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(ID_TOKEN_KID.to_string());
    encode(&header, &claims, &EncodingKey::from_secret(ID_TOKEN_SECRET)).unwrap()
}

/// Write a user document with the given balances.
#[allow(dead_code)]
pub async fn seed_user(state: &AppState, uid: &str, ticket: u64, credit: u64) {
    let mut user = User::starter(
        &format!("player-{uid}"),
        Some(&format!("{uid}@example.com")),
        Provider::Local,
        "img.png",
        "2026-01-01T00:00:00.000000Z",
    );
    user.ticket = ticket;
    user.items.insert("currency_credit".to_string(), credit);
    state.db.set(user_doc(uid), &user).await.unwrap();
}

#[allow(dead_code)]
pub async fn load_user(state: &AppState, uid: &str) -> Option<User> {
    state.db.get(&user_doc(uid)).await.unwrap()
}

/// Decode a JSON response body.
#[allow(dead_code)]
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[allow(dead_code)]
pub fn json_body(value: serde_json::Value) -> Body {
    Body::from(serde_json::to_vec(&value).unwrap())
}
