// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User profile stored in Firestore (`users/{uid}`).
///
/// Every field is defaulted so documents written by older clients or the
/// game server still load.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Display name (denormalized into posts and comments)
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Sign-in provider ("Local" or "Google")
    #[serde(default)]
    pub provider: String,
    /// Accumulated play time in seconds
    #[serde(default)]
    pub playtime: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    /// Web-store currency
    #[serde(default)]
    pub ticket: u64,
    /// Item balances keyed by item ID; the game currency lives at `currency_credit`
    #[serde(default)]
    pub items: BTreeMap<String, u64>,
    #[serde(default)]
    pub last_updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// "admin" grants forum moderation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Sign-in provider recorded on the user document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Local,
    Google,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "Local",
            Provider::Google => "Google",
        }
    }
}

impl User {
    /// Starter document for a first sign-in: zero balances, default image.
    pub fn starter(
        name: &str,
        email: Option<&str>,
        provider: Provider,
        profile_image: &str,
        now: &str,
    ) -> Self {
        let mut items = BTreeMap::new();
        items.insert(crate::models::BalanceKey::CREDIT_ID.to_string(), 0);

        Self {
            name: name.to_string(),
            email: email.map(str::to_string),
            provider: provider.as_str().to_string(),
            playtime: 0,
            profile_image: Some(profile_image.to_string()),
            ticket: 0,
            items,
            last_updated_at: now.to_string(),
            created_at: Some(now.to_string()),
            role: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

/// Audit record written when an account is deleted (`deletedUsers/{uid}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub email: Option<String>,
    pub deleted_at: String,
}
