//! OAuth token records and their lifecycle.
//!
//! [`TokenManager`] owns every stored [`TokenRecord`]. It decides when a token
//! is stale, refreshes it through the relay with retries, merges the result
//! and persists it. Concurrent callers that find the same token stale share
//! a single refresh.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use calsync_core::ProviderKind;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::FutureExt;
use futures_util::future::Shared;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::provider::BoxFuture;
use crate::relay::{AuthRelay, TokenPayload};
use crate::retry::RetryPolicy;
use crate::store::{SecureStore, get_json, set_json};

/// Buffer applied when loading tokens from storage.
pub const STORAGE_REFRESH_BUFFER: TimeDelta = TimeDelta::minutes(5);
/// Buffer applied right before a provider call.
pub const FETCH_REFRESH_BUFFER: TimeDelta = TimeDelta::seconds(60);

/// Store key under which a provider's token record is persisted.
pub fn storage_key(provider: ProviderKind) -> String {
    format!("oauth_tokens:{}", provider.as_str())
}

/// Credentials for one connected account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Space separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub provider: ProviderKind,
    #[serde(default)]
    pub account_email: Option<String>,
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("provider", &self.provider)
            .field("account_email", &self.account_email)
            .finish()
    }
}

impl TokenRecord {
    /// Builds a record from a fresh authorization.
    pub fn from_payload(provider: ProviderKind, payload: TokenPayload, now: DateTime<Utc>) -> Self {
        let account_email = payload.id_token.as_deref().and_then(email_from_id_token);
        Self {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            expires_at: payload.expires_in.map(|secs| now + TimeDelta::seconds(secs)),
            scope: payload.scope,
            token_type: payload.token_type,
            provider,
            account_email,
        }
    }

    /// Returns `true` if the token expires within `buffer` of now.
    pub fn is_stale(&self, buffer: TimeDelta) -> bool {
        self.is_stale_at(Utc::now(), buffer)
    }

    /// Returns `true` if `now >= expires_at - buffer`. Tokens without an
    /// expiry never go stale.
    pub fn is_stale_at(&self, now: DateTime<Utc>, buffer: TimeDelta) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now >= expires_at - buffer)
    }

    /// Applies a refresh response.
    ///
    /// The refresh token is replaced when the provider rotated it and kept
    /// otherwise. Scope and token type are only updated when returned.
    #[must_use]
    pub fn merge_refresh(&self, payload: TokenPayload, now: DateTime<Utc>) -> Self {
        let account_email = payload
            .id_token
            .as_deref()
            .and_then(email_from_id_token)
            .or_else(|| self.account_email.clone());
        Self {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at: payload.expires_in.map(|secs| now + TimeDelta::seconds(secs)),
            scope: payload.scope.or_else(|| self.scope.clone()),
            token_type: payload.token_type.or_else(|| self.token_type.clone()),
            provider: self.provider,
            account_email,
        }
    }

    /// Returns `true` unless the granted scope allows calendar writes.
    ///
    /// A record without a scope is treated as read-only.
    pub fn is_read_only(&self) -> bool {
        let Some(scope) = self.scope.as_deref() else {
            return true;
        };
        !scope.split_whitespace().any(|s| {
            s == "https://www.googleapis.com/auth/calendar"
                || s == "https://www.googleapis.com/auth/calendar.events"
                || s.ends_with("Calendars.ReadWrite")
        })
    }
}

/// Reads the `email` (or Microsoft's `preferred_username`) claim from an
/// OpenID Connect id token. The signature is not verified: the token came
/// straight from the relay over TLS and is only used for display.
pub fn email_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("email")
        .or_else(|| claims.get("preferred_username"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Identifies one refresh: the same refresh token for the same provider.
///
/// The token itself is hashed so it is not kept around as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshKey {
    provider: ProviderKind,
    token_hash: String,
}

impl RefreshKey {
    pub fn new(provider: ProviderKind, refresh_token: &str) -> Self {
        let digest = Sha256::digest(refresh_token.as_bytes());
        let token_hash = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self {
            provider,
            token_hash,
        }
    }
}

/// Staleness buffers and retry policy.
#[derive(Debug, Clone, Copy)]
pub struct TokenManagerConfig {
    pub storage_buffer: TimeDelta,
    pub fetch_buffer: TimeDelta,
    pub retry: RetryPolicy,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            storage_buffer: STORAGE_REFRESH_BUFFER,
            fetch_buffer: FETCH_REFRESH_BUFFER,
            retry: RetryPolicy::default(),
        }
    }
}

impl TokenManagerConfig {
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_buffers(mut self, storage: TimeDelta, fetch: TimeDelta) -> Self {
        self.storage_buffer = storage;
        self.fetch_buffer = fetch;
        self
    }
}

type SharedRefresh = Shared<BoxFuture<'static, ProviderResult<TokenRecord>>>;

struct ManagerInner {
    store: Arc<dyn SecureStore>,
    relay: AuthRelay,
    config: TokenManagerConfig,
    inflight: Mutex<HashMap<RefreshKey, SharedRefresh>>,
}

/// Removes an in-flight registration when the refresh task ends, however it ends.
struct InflightGuard {
    inner: Arc<ManagerInner>,
    key: RefreshKey,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inner.inflight.lock() {
            inflight.remove(&self.key);
        }
    }
}

/// Owner of stored tokens. Cheap to clone.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("relay", &self.inner.relay.base_url())
            .field("config", &self.inner.config)
            .field("inflight", &self.inflight_count())
            .finish()
    }
}

impl TokenManager {
    pub fn new(store: Arc<dyn SecureStore>, relay: AuthRelay, config: TokenManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                relay,
                config,
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn relay(&self) -> &AuthRelay {
        &self.inner.relay
    }

    pub fn store_handle(&self) -> Arc<dyn SecureStore> {
        self.inner.store.clone()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.config.retry
    }

    /// Number of refreshes currently running.
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Reads the stored record without refreshing it.
    pub async fn load(&self, provider: ProviderKind) -> ProviderResult<Option<TokenRecord>> {
        get_json(self.inner.store.as_ref(), &storage_key(provider)).await
    }

    /// Reads the stored record, refreshing it if it expires within the
    /// storage buffer.
    pub async fn load_fresh(&self, provider: ProviderKind) -> ProviderResult<Option<TokenRecord>> {
        let Some(record) = self.load(provider).await? else {
            return Ok(None);
        };
        if !record.is_stale(self.inner.config.storage_buffer) {
            return Ok(Some(record));
        }
        self.refresh_shared(record).await.map(Some)
    }

    /// Returns `token` if it is still valid for at least the fetch buffer,
    /// otherwise a refreshed record.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` if the token is stale and cannot be refreshed,
    /// `RefreshFailed` once refresh attempts are exhausted.
    pub async fn ensure_fresh(&self, token: &TokenRecord) -> ProviderResult<TokenRecord> {
        if !token.is_stale(self.inner.config.fetch_buffer) {
            return Ok(token.clone());
        }
        self.refresh_shared(token.clone()).await
    }

    /// Persists a record, replacing any previous one for its provider.
    pub async fn store(&self, record: &TokenRecord) -> ProviderResult<()> {
        set_json(self.inner.store.as_ref(), &storage_key(record.provider), record).await
    }

    /// Forgets a provider's tokens.
    pub async fn remove(&self, provider: ProviderKind) -> ProviderResult<()> {
        self.inner.store.delete(&storage_key(provider)).await
    }

    /// Providers that have a stored token record.
    pub async fn connected_providers(&self) -> ProviderResult<Vec<ProviderKind>> {
        let mut connected = Vec::new();
        for provider in ProviderKind::ALL {
            if self.load(provider).await?.is_some() {
                connected.push(provider);
            }
        }
        Ok(connected)
    }

    async fn refresh_shared(&self, token: TokenRecord) -> ProviderResult<TokenRecord> {
        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            ProviderError::authentication("access token expired and no refresh token is stored; re-authorization required")
                .with_provider(token.provider.as_str())
        })?;
        let key = RefreshKey::new(token.provider, refresh_token);

        let shared = {
            let mut inflight = self
                .inner
                .inflight
                .lock()
                .map_err(|_| ProviderError::internal("refresh registry poisoned"))?;
            match inflight.get(&key) {
                Some(existing) => {
                    debug!(provider = %token.provider, "joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    let manager = self.clone();
                    let task_key = key.clone();
                    // The task cannot remove its entry before this block has inserted it:
                    // removal takes the same lock.
                    let task = tokio::spawn(async move {
                        let _guard = InflightGuard {
                            inner: manager.inner.clone(),
                            key: task_key,
                        };
                        manager.refresh(token).await
                    });
                    let joined: BoxFuture<'static, ProviderResult<TokenRecord>> =
                        Box::pin(async move {
                            task.await.unwrap_or_else(|e| {
                                Err(ProviderError::internal(format!(
                                    "token refresh task failed: {e}"
                                )))
                            })
                        });
                    let shared = joined.shared();
                    inflight.insert(key, shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    /// Performs one refresh with retries, then merges and persists the result.
    async fn refresh(&self, token: TokenRecord) -> ProviderResult<TokenRecord> {
        let provider = token.provider;

        // Another caller may already have stored a newer token.
        if let Some(stored) = self.load(provider).await?
            && stored.access_token != token.access_token
            && !stored.is_stale(self.inner.config.fetch_buffer)
        {
            debug!(%provider, "stored token already refreshed");
            return Ok(stored);
        }

        let refresh_token = token.refresh_token.as_deref().unwrap_or_default();
        let relay = &self.inner.relay;
        let payload = self
            .inner
            .config
            .retry
            .run("token refresh", move |_| relay.refresh(provider, refresh_token))
            .await
            .map_err(|err| {
                warn!(%provider, error = %err, "token refresh failed");
                if err.code() == ProviderErrorCode::RefreshFailed {
                    err
                } else {
                    err.wrap(ProviderErrorCode::RefreshFailed, "token refresh failed")
                }
            })?;

        let rotated = payload.refresh_token.is_some();
        let merged = token.merge_refresh(payload, Utc::now());
        self.store(&merged).await?;
        info!(%provider, rotated, "access token refreshed");
        Ok(merged)
    }
}
