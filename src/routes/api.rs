// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::db::{user_doc, StoredDoc};
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{BalanceKey, Envelope, User};
use crate::routes::auth::clear_session;
use crate::routes::{encode_cursor, parse_cursor};
use crate::services::mailbox::{DeliveryReceipt, DeliveryRequest};
use crate::services::purchase::{PurchaseReceipt, PurchaseRequest};
use crate::services::profile::ProfileOutcome;
use crate::services::ProfileUpdate;
use crate::time_utils::format_hms;
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

const DEFAULT_MAILBOX_PAGE: u32 = 20;
const MAX_MAILBOX_PAGE: u32 = 50;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route("/api/profile", post(update_profile))
        .route("/api/profile/check-name", get(check_name))
        .route("/api/profile/check-email", get(check_email))
        .route("/api/mailbox", get(list_mailbox).post(deliver_mail))
        .route("/api/purchase", post(purchase))
        .route("/api/admin/ledger", post(adjust_balance))
        .route("/api/account", delete(delete_account))
}

// ─── User Profile ────────────────────────────────────────────

/// Current user as shown to the client.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserView {
    pub uid: String,
    pub name: String,
    pub email: Option<String>,
    pub provider: String,
    pub role: Option<String>,
    pub profile_image: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub playtime: u64,
    /// Play time as `HH:MM:SS`
    pub playtime_formatted: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub ticket: u64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub credit: u64,
    /// Non-currency item counts
    #[cfg_attr(feature = "binding-generation", ts(type = "Record<string, number>"))]
    pub items: BTreeMap<String, u64>,
}

impl UserView {
    pub fn new(uid: &str, user: User, default_image: &str) -> Self {
        let credit = user.items.get(BalanceKey::CREDIT_ID).copied().unwrap_or(0);
        let items = user
            .items
            .into_iter()
            .filter(|(id, _)| !BalanceKey::is_currency_id(id))
            .collect();

        Self {
            uid: uid.to_string(),
            name: user.name,
            email: user.email,
            provider: user.provider,
            role: user.role,
            profile_image: user
                .profile_image
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| default_image.to_string()),
            playtime_formatted: format_hms(user.playtime),
            playtime: user.playtime,
            ticket: user.ticket,
            credit,
            items,
        }
    }
}

async fn load_user(state: &AppState, user_id: &str) -> Result<User> {
    state
        .db
        .get(&user_doc(user_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
}

/// Get current user profile and balances.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserView>> {
    let profile = load_user(&state, &user.user_id).await?;
    Ok(Json(UserView::new(
        &user.user_id,
        profile,
        &state.config.default_profile_image,
    )))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<ProfileOutcome>> {
    let outcome = state
        .profile
        .update_profile(&user.user_id, &update, &state.config.default_profile_image)
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct CheckNameQuery {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct CheckEmailQuery {
    #[serde(default)]
    email: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AvailabilityResponse {
    pub available: bool,
}

async fn check_name(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<CheckNameQuery>,
) -> Result<Json<AvailabilityResponse>> {
    let available = state
        .profile
        .name_available(&params.name, Some(&user.user_id))
        .await?;
    Ok(Json(AvailabilityResponse { available }))
}

async fn check_email(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<CheckEmailQuery>,
) -> Result<Json<AvailabilityResponse>> {
    let available = state
        .profile
        .email_available(&params.email, Some(&user.user_id))
        .await?;
    Ok(Json(AvailabilityResponse { available }))
}

// ─── Mailbox ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct MailboxQuery {
    /// Include currency-only envelopes
    #[serde(default)]
    all: bool,
    #[serde(default = "default_mailbox_page")]
    limit: u32,
    cursor: Option<String>,
}

fn default_mailbox_page() -> u32 {
    DEFAULT_MAILBOX_PAGE
}

#[derive(Serialize)]
pub struct MailboxResponse {
    pub envelopes: Vec<StoredDoc<Envelope>>,
    pub next_cursor: Option<String>,
}

async fn list_mailbox(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<MailboxQuery>,
) -> Result<Json<MailboxResponse>> {
    let limit = params.limit.clamp(1, MAX_MAILBOX_PAGE);
    let cursor = parse_cursor(params.cursor.as_deref())?;

    let page = state
        .mailbox
        .list(&user.user_id, params.all, limit, cursor.as_deref())
        .await?;

    Ok(Json(MailboxResponse {
        envelopes: page.items,
        next_cursor: page.next_cursor.as_deref().map(encode_cursor),
    }))
}

async fn deliver_mail(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<DeliveryRequest>,
) -> Result<Json<DeliveryReceipt>> {
    let receipt = state
        .mailbox
        .deliver(
            &user.user_id,
            request.title.as_deref().unwrap_or_default(),
            request.message().unwrap_or_default(),
            &request.raw_lines(),
        )
        .await?;
    Ok(Json(receipt))
}

// ─── Purchases ───────────────────────────────────────────────

async fn purchase(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<PurchaseReceipt>> {
    let receipt = state.purchases.purchase(&user.user_id, &request).await?;
    Ok(Json(receipt))
}

// ─── Ledger administration ───────────────────────────────────

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Direction {
    Credit,
    Debit,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerAdjustment {
    user_id: String,
    /// "ticket" or an item ID such as "currency_credit"
    currency: String,
    amount: u64,
    direction: Direction,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct BalanceResponse {
    pub currency: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub balance: u64,
}

/// Manual balance correction. Admin only.
async fn adjust_balance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(adjustment): Json<LedgerAdjustment>,
) -> Result<Json<BalanceResponse>> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("admin role required".to_string()));
    }

    let key = match adjustment.currency.trim() {
        "ticket" => BalanceKey::Ticket,
        other => BalanceKey::currency(other).map_or_else(|| BalanceKey::item(other), Ok)?,
    };

    let balance = match adjustment.direction {
        Direction::Credit => {
            state
                .ledger
                .credit(&adjustment.user_id, &key, adjustment.amount)
                .await?
        }
        Direction::Debit => {
            state
                .ledger
                .debit(&adjustment.user_id, &key, adjustment.amount)
                .await?
        }
    };

    tracing::info!(
        admin = %user.user_id,
        target = %adjustment.user_id,
        currency = %key,
        amount = adjustment.amount,
        direction = ?adjustment.direction,
        "Balance adjusted"
    );

    Ok(Json(BalanceResponse {
        currency: key.to_string(),
        balance,
    }))
}

// ─── Account Deletion ────────────────────────────────────────

/// Response for account deletion.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DeleteAccountResponse {
    pub success: bool,
    pub message: String,
}

/// Delete the caller's account and everything that references it.
///
/// An incomplete run keeps the account and reports `unavailable`; calling
/// again resumes where the sweeps left off.
async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<DeleteAccountResponse>)> {
    tracing::info!(user_id = %user.user_id, "User-initiated account deletion");

    let email = match state.db.get::<User>(&user_doc(&user.user_id)).await? {
        Some(profile) => profile.email.or(user.email.clone()),
        None => user.email.clone(),
    };

    let report = state
        .lifecycle
        .delete_account(&user.user_id, email.as_deref())
        .await;

    if !report.completed {
        return Err(AppError::Unavailable(format!(
            "account deletion incomplete for {}: {:?}",
            user.user_id, report.failed_steps
        )));
    }

    Ok((
        clear_session(jar, state.config.cookie_secure),
        Json(DeleteAccountResponse {
            success: true,
            message: "Account deleted. All data has been removed.".to_string(),
        }),
    ))
}
