// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sign-in, session cookies and email verification routes.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::{AppError, Result};
use crate::middleware::auth::{
    create_jwt, verify_jwt, AuthUser, TokenKind, REFRESH_COOKIE, TOKEN_COOKIE,
};
use crate::models::{Provider, User};
use crate::routes::api::UserView;
use crate::time_utils::format_hms;
use crate::AppState;

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/session", post(session_login))
        .route("/auth/oauth/google", post(google_login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/signout", post(signout))
        .route("/auth/request-verification", post(request_verification))
        .route("/auth/verify-code", post(verify_code))
}

/// Routes mounted behind the auth middleware in routes/mod.rs.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/status", get(status))
}

// ─── Cookies ─────────────────────────────────────────────────

fn session_cookie(
    name: &'static str,
    value: String,
    ttl: Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(ttl.as_secs() as i64))
        .build()
}

/// Removal must repeat the creation attributes or browsers keep the cookie.
fn removal_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::ZERO)
        .build()
}

fn issue_tokens(
    state: &AppState,
    jar: CookieJar,
    user_id: &str,
    email: Option<&str>,
    role: Option<&str>,
) -> Result<CookieJar> {
    let key = &state.config.jwt_signing_key;
    let secure = state.config.cookie_secure;

    let access = create_jwt(user_id, email, role, TokenKind::Access, key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;
    let refresh = create_jwt(user_id, email, role, TokenKind::Refresh, key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;

    Ok(jar
        .add(session_cookie(TOKEN_COOKIE, access, TokenKind::Access.ttl(), secure))
        .add(session_cookie(REFRESH_COOKIE, refresh, TokenKind::Refresh.ttl(), secure)))
}

/// Clear both session cookies.
pub(crate) fn clear_session(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(removal_cookie(TOKEN_COOKIE, secure))
        .add(removal_cookie(REFRESH_COOKIE, secure))
}

// ─── Sign-in ─────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    id_token: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionResponse {
    pub uid: String,
    pub name: String,
    /// True when this sign-in created the account
    pub created: bool,
    /// Accumulated play time as `HH:MM:SS`
    pub playtime: String,
}

/// Email/password sign-in, completed client-side; the ID token proves it.
async fn session_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<SignInRequest>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    sign_in(&state, jar, &body.id_token, None).await
}

async fn google_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<SignInRequest>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    sign_in(&state, jar, &body.id_token, Some(Provider::Google)).await
}

async fn sign_in(
    state: &AppState,
    jar: CookieJar,
    id_token: &str,
    required_provider: Option<Provider>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let identity = state.id_token_verifier.verify_id_token(id_token).await?;
    if required_provider.is_some_and(|p| p != identity.provider) {
        tracing::warn!(uid = %identity.uid, "ID token from unexpected provider");
        return Err(AppError::InvalidToken);
    }

    let (user, created) = state
        .lifecycle
        .provision(&identity, &state.config.default_profile_image)
        .await?;

    let email = identity.email.as_deref().or(user.email.as_deref());
    let jar = issue_tokens(state, jar, &identity.uid, email, user.role.as_deref())?;

    tracing::info!(
        uid = %identity.uid,
        created,
        provider = identity.provider.as_str(),
        "Session established"
    );

    Ok((
        jar,
        Json(SessionResponse {
            uid: identity.uid,
            name: user.name,
            created,
            playtime: format_hms(user.playtime),
        }),
    ))
}

/// Exchange the refresh cookie for a new access token.
async fn refresh(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode)> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AppError::Unauthorized)?;
    let claims = verify_jwt(&token, TokenKind::Refresh, &state.config.jwt_signing_key)?;

    let access = create_jwt(
        &claims.sub,
        claims.email.as_deref(),
        claims.role.as_deref(),
        TokenKind::Access,
        &state.config.jwt_signing_key,
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;

    let jar = jar.add(session_cookie(
        TOKEN_COOKIE,
        access,
        TokenKind::Access.ttl(),
        state.config.cookie_secure,
    ));
    Ok((jar, StatusCode::NO_CONTENT))
}

async fn signout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, StatusCode) {
    (clear_session(jar, state.config.cookie_secure), StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StatusResponse {
    pub logged_in: bool,
    pub user: UserView,
}

async fn status(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<StatusResponse>> {
    let user: User = state
        .db
        .get(&crate::db::user_doc(&auth.user_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", auth.user_id)))?;

    Ok(Json(StatusResponse {
        logged_in: true,
        user: UserView::new(&auth.user_id, user, &state.config.default_profile_image),
    }))
}

// ─── Email verification ──────────────────────────────────────

#[derive(Deserialize)]
pub struct VerificationRequest {
    email: String,
}

#[derive(Deserialize)]
pub struct VerifyCodeRequest {
    email: String,
    code: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct VerificationResponse {
    pub success: bool,
    pub message: String,
}

async fn request_verification(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerificationRequest>,
) -> Result<Json<VerificationResponse>> {
    state.verification.request_code(&body.email).await?;
    Ok(Json(VerificationResponse {
        success: true,
        message: "Verification code sent".to_string(),
    }))
}

async fn verify_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyCodeRequest>,
) -> Result<Json<VerificationResponse>> {
    state.verification.verify_code(&body.email, &body.code).await?;
    Ok(Json(VerificationResponse {
        success: true,
        message: "Email verified".to_string(),
    }))
}
