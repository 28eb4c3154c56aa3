// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Email verification codes and the outbound notifier that sends them.

use crate::config::Config;
use crate::db::{verification_doc, FirestoreDb};
use crate::error::{AppError, Result};
use crate::models::VerificationCode;
use crate::time_utils::now_millis;
use anyhow::Context;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subtle::ConstantTimeEq;

const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
enum NotifierMode {
    Relay {
        http_client: reqwest::Client,
        url: String,
    },
    /// Logs and keeps sent messages (local development and tests).
    Log(Arc<Mutex<Vec<(String, String)>>>),
}

/// Sends verification codes to users.
#[derive(Clone)]
pub struct Notifier {
    mode: NotifierMode,
}

impl Notifier {
    /// Relay-backed notifier when `MAIL_RELAY_URL` is configured, log-only otherwise.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let Some(url) = config.mail_relay_url.clone() else {
            tracing::warn!("MAIL_RELAY_URL not set; verification codes will only be logged");
            return Ok(Self::new_log());
        };

        let http_client = reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .context("failed building mail relay HTTP client")?;

        Ok(Self {
            mode: NotifierMode::Relay { http_client, url },
        })
    }

    pub fn new_log() -> Self {
        Self {
            mode: NotifierMode::Log(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Messages captured by a log-only notifier, as (recipient, code).
    pub fn sent(&self) -> Vec<(String, String)> {
        match &self.mode {
            NotifierMode::Log(sent) => sent.lock().map(|s| s.clone()).unwrap_or_default(),
            NotifierMode::Relay { .. } => Vec::new(),
        }
    }

    pub async fn send_code(&self, email: &str, code: &str) -> Result<()> {
        match &self.mode {
            NotifierMode::Log(sent) => {
                tracing::info!(email, "Verification code issued (log-only notifier)");
                if let Ok(mut sent) = sent.lock() {
                    sent.push((email.to_string(), code.to_string()));
                }
                Ok(())
            }
            NotifierMode::Relay { http_client, url } => {
                let body = serde_json::json!({
                    "to": email,
                    "subject": "Email verification code",
                    "html": format!(
                        "<h3>Verification code: {}</h3><p>Enter it within 5 minutes.</p>",
                        code
                    ),
                });

                http_client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| AppError::Delivery(format!("mail relay: {}", e)))?;

                tracing::info!(email, "Verification code sent");
                Ok(())
            }
        }
    }
}

/// Issues and checks email verification codes.
#[derive(Clone)]
pub struct VerificationService {
    db: FirestoreDb,
    notifier: Notifier,
}

impl VerificationService {
    pub fn new(db: FirestoreDb, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    /// Store a fresh code for `email`, replacing any earlier one, then send it.
    pub async fn request_code(&self, email: &str) -> Result<()> {
        let email = normalize_email(email)?;
        let code = format!("{:06}", rand::thread_rng().gen_range(100_000..1_000_000));

        self.db
            .set(
                verification_doc(&email),
                &VerificationCode {
                    code: code.clone(),
                    created_at: now_millis(),
                },
            )
            .await?;

        // Sent after the write commits; a failed send leaves a valid code behind
        self.notifier.send_code(&email, &code).await
    }

    /// Check `code` against the stored code for `email`.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<()> {
        let email = normalize_email(email)?;
        let stored: Option<VerificationCode> = self.db.get(&verification_doc(&email)).await?;

        let stored = match stored {
            Some(stored) if !stored.is_expired(now_millis()) => stored,
            _ => return Err(AppError::InvalidPayload("code expired".to_string())),
        };

        if !bool::from(stored.code.as_bytes().ct_eq(code.trim().as_bytes())) {
            return Err(AppError::InvalidPayload("verification failed".to_string()));
        }

        Ok(())
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::InvalidPayload("a valid email is required".to_string()));
    }
    Ok(email.to_string())
}
