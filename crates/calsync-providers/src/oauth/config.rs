//! Per-provider OAuth client settings.

use std::time::Duration;

use calsync_core::ProviderKind;
use url::Url;

use super::pkce::OAuthSession;
use crate::error::{ProviderError, ProviderResult};

/// Default time to wait for the browser to come back with a callback.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_CALENDAR_READONLY_SCOPE: &str =
    "https://www.googleapis.com/auth/calendar.readonly";

pub const MICROSOFT_AUTH_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const MICROSOFT_CALENDAR_READ_SCOPE: &str = "https://graph.microsoft.com/Calendars.Read";

/// Public OAuth client settings for one provider. Holds no secret: code
/// exchange goes through the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProviderConfig {
    pub provider: ProviderKind,
    /// Registered public client id. Required before a flow can start.
    pub client_id: Option<String>,
    pub authorize_url: String,
    pub scopes: Vec<String>,
    /// Provider specific authorization parameters.
    pub extra_params: Vec<(String, String)>,
    /// A fixed redirect URI. When it uses a custom app scheme the callback
    /// arrives through the deep-link router; when unset a loopback listener
    /// on an ephemeral port is used.
    pub redirect_uri: Option<String>,
}

impl OAuthProviderConfig {
    /// Google Calendar, read-only, with offline access so a refresh token is issued.
    pub fn google(client_id: Option<String>) -> Self {
        Self {
            provider: ProviderKind::Google,
            client_id,
            authorize_url: GOOGLE_AUTH_URL.to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                GOOGLE_CALENDAR_READONLY_SCOPE.to_string(),
            ],
            extra_params: vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
            redirect_uri: None,
        }
    }

    /// Microsoft Graph calendars, read-only. `offline_access` yields a refresh token.
    pub fn microsoft(client_id: Option<String>) -> Self {
        Self {
            provider: ProviderKind::Microsoft,
            client_id,
            authorize_url: MICROSOFT_AUTH_URL.to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
                MICROSOFT_CALENDAR_READ_SCOPE.to_string(),
            ],
            extra_params: vec![
                ("prompt".to_string(), "select_account".to_string()),
                ("response_mode".to_string(), "query".to_string()),
            ],
            redirect_uri: None,
        }
    }

    /// Preset for `provider`.
    pub fn for_provider(provider: ProviderKind, client_id: Option<String>) -> Self {
        match provider {
            ProviderKind::Google => Self::google(client_id),
            ProviderKind::Microsoft => Self::microsoft(client_id),
        }
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    #[must_use]
    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Returns the client id, or a configuration error if none is set.
    pub fn require_client_id(&self) -> ProviderResult<&str> {
        self.client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ProviderError::configuration(format!(
                    "no OAuth client id configured for {}",
                    self.provider
                ))
                .with_provider(self.provider.as_str())
            })
    }

    /// The custom URI scheme of the redirect, if one is configured.
    pub fn custom_scheme(&self) -> Option<String> {
        let redirect = self.redirect_uri.as_deref()?;
        let scheme = Url::parse(redirect).ok()?.scheme().to_string();
        (scheme != "http" && scheme != "https").then_some(scheme)
    }

    /// Builds the authorization URL for `session`.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` for a missing client id or malformed endpoint,
    /// `InternalError` if the session's nonce was already consumed.
    pub fn authorization_url(&self, session: &OAuthSession) -> ProviderResult<Url> {
        let client_id = self.require_client_id()?;
        let state = session
            .state()
            .ok_or_else(|| ProviderError::internal("authorization session already used"))?;
        let mut url = Url::parse(&self.authorize_url).map_err(|e| {
            ProviderError::configuration(format!(
                "invalid authorization endpoint {}: {e}",
                self.authorize_url
            ))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", client_id)
                .append_pair("redirect_uri", session.redirect_uri())
                .append_pair("scope", &self.scopes.join(" "))
                .append_pair("state", state)
                .append_pair("code_challenge", session.code_challenge())
                .append_pair("code_challenge_method", "S256");
            for (key, value) in &self.extra_params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use std::collections::HashMap;

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn google_authorization_url() {
        let config = OAuthProviderConfig::google(Some("cid.apps.googleusercontent.com".into()));
        let session = OAuthSession::new(
            ProviderKind::Google,
            "http://127.0.0.1:5000/oauth/callback/google",
        );
        let url = config.authorization_url(&session).unwrap();
        assert!(url.as_str().starts_with(GOOGLE_AUTH_URL));

        let q = query_map(&url);
        assert_eq!(q["response_type"], "code");
        assert_eq!(q["client_id"], "cid.apps.googleusercontent.com");
        assert_eq!(q["redirect_uri"], "http://127.0.0.1:5000/oauth/callback/google");
        assert_eq!(q["state"], session.state().unwrap());
        assert_eq!(q["code_challenge"], session.code_challenge());
        assert_eq!(q["code_challenge_method"], "S256");
        assert_eq!(q["access_type"], "offline");
        assert_eq!(q["prompt"], "consent");
        assert!(q["scope"].contains(GOOGLE_CALENDAR_READONLY_SCOPE));
    }

    #[test]
    fn microsoft_requests_offline_access() {
        let config = OAuthProviderConfig::microsoft(Some("app-id".into()));
        let session = OAuthSession::new(ProviderKind::Microsoft, "calsync://auth");
        let q = query_map(&config.authorization_url(&session).unwrap());
        assert!(q["scope"].split(' ').any(|s| s == "offline_access"));
        assert_eq!(q["response_mode"], "query");
    }

    #[test]
    fn missing_or_blank_client_id_is_configuration_error() {
        for client_id in [None, Some("  ".to_string())] {
            let config = OAuthProviderConfig::google(client_id);
            let err = config.require_client_id().unwrap_err();
            assert_eq!(err.code(), ProviderErrorCode::ConfigurationError);
        }
    }

    #[test]
    fn custom_scheme_detection() {
        let config = OAuthProviderConfig::google(None);
        assert_eq!(config.custom_scheme(), None);
        assert_eq!(
            config.clone().with_redirect_uri("calsync://auth").custom_scheme(),
            Some("calsync".to_string())
        );
        assert_eq!(
            config
                .with_redirect_uri("http://localhost:8080/cb")
                .custom_scheme(),
            None
        );
    }
}
