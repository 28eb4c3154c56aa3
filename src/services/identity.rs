// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firebase identity: ID token verification and account record deletion.

use crate::config::Config;
use crate::error::AppError;
use crate::models::Provider;
use anyhow::Context;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// Identity established by a verified Firebase ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub provider: Provider,
}

#[derive(Clone)]
enum VerifierMode {
    Firebase,
    StaticKey {
        kid: String,
        algorithm: Algorithm,
        decoding_key: Arc<DecodingKey>,
    },
}

#[derive(Clone)]
struct JwksCacheEntry {
    keys_by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Verifier for Firebase Auth ID tokens.
pub struct FirebaseVerifier {
    http_client: reqwest::Client,
    project_id: String,
    mode: VerifierMode,
    jwks_cache: RwLock<Option<JwksCacheEntry>>,
    refresh_lock: Mutex<()>,
}

impl FirebaseVerifier {
    /// Create a production verifier that fetches and caches the Firebase JWKS.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building identity HTTP client")?;

        tracing::info!(
            project = %config.gcp_project_id,
            "Initialized Firebase ID token verifier"
        );

        Ok(Self {
            http_client,
            project_id: config.gcp_project_id.clone(),
            mode: VerifierMode::Firebase,
            jwks_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Create a verifier with a single static key.
    ///
    /// This is intended for deterministic local/integration tests.
    pub fn new_with_static_key(
        config: &Config,
        kid: impl Into<String>,
        algorithm: Algorithm,
        decoding_key: DecodingKey,
    ) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            anyhow::bail!("static verifier kid must not be empty");
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building identity HTTP client")?;

        Ok(Self {
            http_client,
            project_id: config.gcp_project_id.clone(),
            mode: VerifierMode::StaticKey {
                kid,
                algorithm,
                decoding_key: Arc::new(decoding_key),
            },
            jwks_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    fn expected_algorithm(&self) -> Algorithm {
        match &self.mode {
            VerifierMode::StaticKey { algorithm, .. } => *algorithm,
            VerifierMode::Firebase => Algorithm::RS256,
        }
    }

    /// Verify a Firebase ID token and return the identity it carries.
    pub async fn verify_id_token(&self, token: &str) -> Result<VerifiedIdentity, AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::InvalidToken);
        }

        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Invalid ID token header");
            AppError::InvalidToken
        })?;

        let algorithm = self.expected_algorithm();
        if header.alg != algorithm {
            tracing::debug!(alg = ?header.alg, "Unexpected ID token algorithm");
            return Err(AppError::InvalidToken);
        }

        let kid = header.kid.ok_or(AppError::InvalidToken)?;
        let decoding_key = self.decoding_key_for_kid(&kid).await?;

        let issuer = format!("https://securetoken.google.com/{}", self.project_id);
        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.leeway = CLOCK_SKEW_SECS;

        let claims = decode::<FirebaseClaims>(token, decoding_key.as_ref(), &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "ID token validation failed");
                AppError::InvalidToken
            })?
            .claims;

        validate_iat(claims.iat)?;

        if claims.sub.is_empty() || claims.sub.len() > 128 {
            return Err(AppError::InvalidToken);
        }

        let provider = match claims
            .firebase
            .as_ref()
            .and_then(|f| f.sign_in_provider.as_deref())
        {
            Some("google.com") => Provider::Google,
            _ => Provider::Local,
        };

        Ok(VerifiedIdentity {
            uid: claims.sub,
            email: claims.email,
            name: claims.name,
            provider,
        })
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<Arc<DecodingKey>, AppError> {
        if let VerifierMode::StaticKey {
            kid: static_kid,
            decoding_key,
            ..
        } = &self.mode
        {
            if kid == static_kid {
                return Ok(decoding_key.clone());
            }
            return Err(AppError::InvalidToken);
        }

        if let Some(key) = self.lookup_cached_key(kid).await {
            return Ok(key);
        }

        for force_refresh in [false, true] {
            self.refresh_jwks(force_refresh).await?;
            if let Some(key) = self.lookup_cached_key(kid).await {
                return Ok(key);
            }
        }

        tracing::warn!(kid, "ID token kid not found in JWKS after refresh");
        Err(AppError::InvalidToken)
    }

    async fn lookup_cached_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        let cache = self.jwks_cache.read().await;
        let now = Instant::now();
        cache
            .as_ref()
            .filter(|entry| entry.expires_at > now)
            .and_then(|entry| entry.keys_by_kid.get(kid))
            .cloned()
    }

    async fn refresh_jwks(&self, force_refresh: bool) -> Result<(), AppError> {
        let _guard = self.refresh_lock.lock().await;

        if !force_refresh {
            let cache = self.jwks_cache.read().await;
            if cache
                .as_ref()
                .is_some_and(|entry| entry.expires_at > Instant::now())
            {
                return Ok(());
            }
        }

        tracing::debug!("Refreshing Firebase JWKS cache");

        let response = self
            .http_client
            .get(FIREBASE_JWKS_URL)
            .send()
            .await
            .map_err(|e| AppError::Unavailable(format!("JWKS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Unavailable(format!(
                "JWKS request returned status {}",
                response.status()
            )));
        }

        let ttl = cache_ttl_from_headers(response.headers(), DEFAULT_CACHE_TTL);

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| AppError::Unavailable(format!("invalid JWKS JSON: {e}")))?;

        let mut keys_by_kid: HashMap<String, Arc<DecodingKey>> = HashMap::new();

        for jwk in jwks.keys {
            if jwk.kty != "RSA" || jwk.kid.trim().is_empty() {
                continue;
            }

            if jwk.alg.as_deref().is_some_and(|alg| alg != "RS256") {
                continue;
            }

            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys_by_kid.insert(jwk.kid, Arc::new(key));
                }
                Err(e) => {
                    tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA JWKS key");
                }
            }
        }

        if keys_by_kid.is_empty() {
            return Err(AppError::Unavailable(
                "JWKS response did not include any usable RSA keys".to_string(),
            ));
        }

        *self.jwks_cache.write().await = Some(JwksCacheEntry {
            keys_by_kid,
            expires_at: Instant::now() + ttl,
        });

        tracing::debug!(ttl_secs = ttl.as_secs(), "Firebase JWKS cache refreshed");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    iat: Option<usize>,
    email: Option<String>,
    name: Option<String>,
    firebase: Option<FirebaseInfo>,
}

#[derive(Debug, Deserialize)]
struct FirebaseInfo {
    sign_in_provider: Option<String>,
}

fn validate_iat(iat: Option<usize>) -> Result<(), AppError> {
    let Some(iat) = iat else {
        return Err(AppError::InvalidToken);
    };

    if iat as u64 > now_unix_secs() + CLOCK_SKEW_SECS {
        return Err(AppError::InvalidToken);
    }

    Ok(())
}

fn cache_ttl_from_headers(headers: &reqwest::header::HeaderMap, fallback: Duration) -> Duration {
    headers
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_cache_control_max_age)
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

fn parse_cache_control_max_age(value: &str) -> Option<u64> {
    value.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|raw| raw.trim_matches('"').parse::<u64>().ok())
    })
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ─── Account records ─────────────────────────────────────────

#[derive(Clone)]
enum AdminMode {
    Live { http_client: reqwest::Client },
    /// Records deleted UIDs instead of calling out.
    Mock(Arc<StdMutex<Vec<String>>>),
}

/// Deletes Firebase Auth account records.
#[derive(Clone)]
pub struct IdentityAdmin {
    project_id: String,
    mode: AdminMode,
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

impl IdentityAdmin {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building identity admin HTTP client")?;

        Ok(Self {
            project_id: config.gcp_project_id.clone(),
            mode: AdminMode::Live { http_client },
        })
    }

    pub fn new_mock() -> Self {
        Self {
            project_id: "mock".to_string(),
            mode: AdminMode::Mock(Arc::new(StdMutex::new(Vec::new()))),
        }
    }

    /// UIDs deleted through a mock admin.
    pub fn deleted_uids(&self) -> Vec<String> {
        match &self.mode {
            AdminMode::Mock(deleted) => deleted.lock().map(|d| d.clone()).unwrap_or_default(),
            AdminMode::Live { .. } => Vec::new(),
        }
    }

    /// Delete the account record for `uid`. An already-missing record counts
    /// as deleted.
    pub async fn delete_user(&self, uid: &str) -> Result<(), AppError> {
        let http_client = match &self.mode {
            AdminMode::Mock(deleted) => {
                if let Ok(mut deleted) = deleted.lock() {
                    deleted.push(uid.to_string());
                }
                return Ok(());
            }
            AdminMode::Live { http_client } => http_client,
        };

        let token: AccessToken = http_client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::Unavailable(format!("metadata token request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Unavailable(format!("invalid metadata token: {e}")))?;

        let url = format!(
            "{}/projects/{}/accounts:delete",
            IDENTITY_TOOLKIT_URL, self.project_id
        );
        let response = http_client
            .post(&url)
            .bearer_auth(&token.access_token)
            .json(&serde_json::json!({ "localId": uid }))
            .send()
            .await
            .map_err(|e| AppError::Unavailable(format!("accounts:delete request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if body.contains("USER_NOT_FOUND") {
            tracing::info!(uid, "Identity record already deleted");
            return Ok(());
        }

        Err(AppError::Unavailable(format!(
            "accounts:delete returned {}: {}",
            status, body
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &[u8] = b"identity-test-secret";

    fn verifier() -> FirebaseVerifier {
        FirebaseVerifier::new_with_static_key(
            &Config::test_default(),
            "test-kid",
            Algorithm::HS256,
            DecodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn token(claims: serde_json::Value, kid: &str) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn claims(aud: &str) -> serde_json::Value {
        let now = now_unix_secs();
        json!({
            "iss": "https://securetoken.google.com/test-project",
            "aud": aud,
            "sub": "uid-1",
            "iat": now,
            "exp": now + 3600,
            "email": "p@example.com",
            "firebase": {"sign_in_provider": "google.com"}
        })
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let identity = verifier()
            .verify_id_token(&token(claims("test-project"), "test-kid"))
            .await
            .unwrap();

        assert_eq!(identity.uid, "uid-1");
        assert_eq!(identity.email.as_deref(), Some("p@example.com"));
        assert_eq!(identity.provider, Provider::Google);
    }

    #[tokio::test]
    async fn test_wrong_audience_or_kid_rejected() {
        let v = verifier();
        assert!(matches!(
            v.verify_id_token(&token(claims("other-project"), "test-kid")).await,
            Err(AppError::InvalidToken)
        ));
        assert!(matches!(
            v.verify_id_token(&token(claims("test-project"), "other-kid")).await,
            Err(AppError::InvalidToken)
        ));
        assert!(matches!(
            v.verify_id_token("").await,
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn parse_cache_control_max_age_valid() {
        assert_eq!(
            parse_cache_control_max_age("public, max-age=3600"),
            Some(3600)
        );
        assert_eq!(parse_cache_control_max_age("max-age=\"120\""), Some(120));
        assert_eq!(parse_cache_control_max_age("public, immutable"), None);
    }

    #[tokio::test]
    async fn test_mock_admin_records_deletions() {
        let admin = IdentityAdmin::new_mock();
        admin.delete_user("u1").await.unwrap();
        assert_eq!(admin.deleted_uids(), vec!["u1".to_string()]);
    }
}
