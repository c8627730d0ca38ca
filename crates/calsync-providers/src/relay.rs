//! Client for the backend token relay.
//!
//! The desktop app never holds an OAuth client secret. Code exchange and
//! refresh go through a backend endpoint, `POST <base>/api/auth/<provider>`,
//! which adds the secret, talks to the provider's token endpoint and returns
//! the token response in a normalized shape.

use std::time::Duration;

use calsync_core::ProviderKind;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};

/// Default request timeout for relay calls.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Token response returned by the relay for both exchange and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPayload {
    pub access_token: String,
    /// Present on first authorization and when the provider rotates it.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    /// OpenID Connect id token, used to learn the account email.
    #[serde(default)]
    pub id_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RelayRequest<'a> {
    Exchange {
        code: &'a str,
        redirect_uri: &'a str,
        code_verifier: &'a str,
    },
    Refresh {
        grant_type: &'static str,
        refresh_token: &'a str,
    },
}

/// HTTP client for the relay.
#[derive(Debug, Clone)]
pub struct AuthRelay {
    base_url: String,
    http: reqwest::Client,
}

impl AuthRelay {
    /// Creates a relay client rooted at `base_url` (e.g. `https://api.example.com`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is not absolute http(s) or the
    /// HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ProviderResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let parsed = url::Url::parse(&base_url).map_err(|e| {
            ProviderError::configuration(format!("invalid relay URL {base_url}: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::configuration(format!(
                "relay URL must be http(s): {base_url}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to build HTTP client: {e}"))
                    .with_source(e)
            })?;

        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, provider: ProviderKind) -> String {
        format!("{}/api/auth/{}", self.base_url, provider.as_str())
    }

    /// Exchanges an authorization code for tokens. Single attempt.
    ///
    /// # Errors
    ///
    /// `RateLimited` on 429, `NetworkError` on transport failure,
    /// `ExchangeFailed` with the response body on any other non-2xx status.
    pub async fn exchange_code(
        &self,
        provider: ProviderKind,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> ProviderResult<TokenPayload> {
        debug!(%provider, "exchanging authorization code via relay");
        let request = RelayRequest::Exchange {
            code,
            redirect_uri,
            code_verifier,
        };
        let payload = self
            .post(provider, &request, ProviderErrorCode::ExchangeFailed, "token exchange failed")
            .await?;
        info!(%provider, "authorization code exchanged");
        Ok(payload)
    }

    /// Refreshes an access token. Single attempt.
    ///
    /// # Errors
    ///
    /// As [`exchange_code`](Self::exchange_code), with `RefreshFailed` for
    /// non-2xx statuses other than 429.
    pub async fn refresh(
        &self,
        provider: ProviderKind,
        refresh_token: &str,
    ) -> ProviderResult<TokenPayload> {
        debug!(%provider, "refreshing access token via relay");
        let request = RelayRequest::Refresh {
            grant_type: "refresh_token",
            refresh_token,
        };
        self.post(provider, &request, ProviderErrorCode::RefreshFailed, "token refresh failed")
            .await
    }

    async fn post(
        &self,
        provider: ProviderKind,
        request: &RelayRequest<'_>,
        failure: ProviderErrorCode,
        context: &str,
    ) -> ProviderResult<TokenPayload> {
        let response = self
            .http
            .post(self.endpoint(provider))
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e).with_provider(provider.as_str()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ProviderError::network(format!("failed to read relay response: {e}"))
                .with_provider(provider.as_str())
                .with_source(e)
        })?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::rate_limited(format!("{context} ({status}): {body}"))
                .with_status(status.as_u16())
                .with_provider(provider.as_str()));
        }
        if !status.is_success() {
            return Err(
                ProviderError::new(failure, format!("{context} ({status}): {body}"))
                    .with_status(status.as_u16())
                    .with_provider(provider.as_str()),
            );
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("invalid token response: {e}"))
                .with_provider(provider.as_str())
                .with_source(e)
        })
    }
}
