//! Bearer token cache for gateway calls.
//!
//! One cache is shared by every concurrent job in the process. Reads of a fresh
//! token take only the read lock; refreshes are serialised behind a separate
//! mutex so N callers racing on an expired token trigger a single grant.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer};
use tokio::sync::{Mutex, RwLock};

use herald_common::config::AppConfig;

use crate::error::DispatchError;

/// Seconds subtracted from the reported expiry before a token counts as stale.
pub const SAFETY_BUFFER_SECS: i64 = 120;

/// Lifetime assumed when the token endpoint omits or garbles `expires_in`.
const FALLBACK_EXPIRES_IN_SECS: i64 = 121;

/// Longest lifetime accepted from the issuer; anything outside
/// `0..=MAX_EXPIRES_IN_SECS` is treated as garbled.
const MAX_EXPIRES_IN_SECS: i64 = 86_400;

/// Response body of the client-credentials grant.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds; some issuers send it as a string
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<i64>,
    pub access_token: String,
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Issues access tokens. Implemented over HTTP in production and faked in tests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessTokenResponse, DispatchError>;
}

/// OAuth client-credentials grant against the identity endpoint.
pub struct HttpTokenSource {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    scope: String,
}

impl HttpTokenSource {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &AppConfig) -> Self {
        Self::new(
            http,
            &config.token_endpoint,
            &config.microsoft_app_id,
            &config.microsoft_app_password,
            &config.token_scope,
        )
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self) -> Result<AccessTokenResponse, DispatchError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self.http.post(&self.endpoint).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = %status, "Token endpoint refused client-credentials grant");
            return Err(DispatchError::AuthenticationFailure { status });
        }

        response
            .json::<AccessTokenResponse>()
            .await
            .map_err(|e| DispatchError::InvalidResponse(format!("token response: {e}")))
    }
}

/// A bearer token and the instant the issuer says it expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn from_response(response: AccessTokenResponse, issued_at: DateTime<Utc>) -> Self {
        let lifetime = response
            .expires_in
            .filter(|secs| (0..=MAX_EXPIRES_IN_SECS).contains(secs))
            .unwrap_or(FALLBACK_EXPIRES_IN_SECS);
        Self {
            access_token: response.access_token,
            expires_at: issued_at + Duration::seconds(lifetime),
        }
    }

    /// Usable until the safety buffer before `expires_at`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(SAFETY_BUFFER_SECS)
    }
}

/// Process-wide cached bearer token, refreshed on demand.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    slot: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            slot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Start with an already-issued token in the slot.
    pub fn with_token(source: Arc<dyn TokenSource>, token: CachedToken) -> Self {
        Self {
            source,
            slot: RwLock::new(Some(token)),
            refresh: Mutex::new(()),
        }
    }

    /// Return a token that is valid past the safety buffer, fetching a new one
    /// if the cached value is missing or stale.
    ///
    /// Errors from the token endpoint are fatal for the calling job and are
    /// never retried here.
    pub async fn get_valid_token(&self) -> Result<String, DispatchError> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let response = self.source.fetch_token().await?;
        let token = CachedToken::from_response(response, Utc::now());
        tracing::info!(expires_at = %token.expires_at, "Refreshed gateway access token");

        let access_token = token.access_token.clone();
        *self.slot.write().await = Some(token);
        Ok(access_token)
    }

    /// Snapshot of the cached token, fresh or not.
    pub async fn cached(&self) -> Option<CachedToken> {
        self.slot.read().await.clone()
    }

    async fn fresh_token(&self) -> Option<String> {
        let now = Utc::now();
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_fresh(now))
            .map(|token| token.access_token.clone())
    }
}
