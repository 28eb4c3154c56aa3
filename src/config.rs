// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Cloud Run injects secrets as environment variables via secret bindings,
//! so everything is read once at startup.

use std::env;
use std::time::Duration;

/// Hard ceiling on how long a long-poll request may be held open.
pub const LONGPOLL_CEILING: Duration = Duration::from_secs(600);

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL (CORS origin)
    pub frontend_url: String,
    /// GCP project ID (Firestore and Firebase Auth)
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Profile image assigned to new accounts and on reset
    pub default_profile_image: String,
    /// HTTP relay that delivers verification emails; codes are logged when unset
    pub mail_relay_url: Option<String>,
    /// Set the `Secure` attribute on session cookies
    pub cookie_secure: bool,
    /// Server-side cap on long-poll duration (never above [`LONGPOLL_CEILING`])
    pub longpoll_max: Duration,
    /// How often a watched user document is re-read for external changes
    pub longpoll_refresh: Duration,

    // --- Secrets ---
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Deterministic config for tests only.
    pub fn test_default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            default_profile_image: "https://example.com/User_defaultImg.png".to_string(),
            mail_relay_url: None,
            cookie_secure: false,
            longpoll_max: LONGPOLL_CEILING,
            longpoll_refresh: Duration::from_secs(2),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let longpoll_max_secs: u64 = parse_or("LONGPOLL_MAX_SECS", LONGPOLL_CEILING.as_secs())?;
        let longpoll_poll_secs: u64 = parse_or("LONGPOLL_POLL_SECS", 2)?;

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: parse_or("PORT", 8080)?,
            default_profile_image: env::var("DEFAULT_PROFILE_IMAGE").unwrap_or_default(),
            mail_relay_url: env::var("MAIL_RELAY_URL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            cookie_secure: parse_or("COOKIE_SECURE", true)?,
            longpoll_max: Duration::from_secs(longpoll_max_secs).min(LONGPOLL_CEILING),
            longpoll_refresh: Duration::from_secs(longpoll_poll_secs.max(1)),

            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .trim()
                .as_bytes()
                .to_vec(),
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("LONGPOLL_MAX_SECS", "3600");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.jwt_signing_key, b"test_jwt_key_32_bytes_minimum!!");
        assert_eq!(config.port, 8080);
        // Clamped to the ceiling
        assert_eq!(config.longpoll_max, LONGPOLL_CEILING);

        env::remove_var("LONGPOLL_MAX_SECS");
    }
}
