//! PKCE (RFC 7636) values and the per-attempt authorization session.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use calsync_core::ProviderKind;
use rand::Rng as _;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{ProviderError, ProviderResult};

/// Verifier entropy in bytes, before base64 encoding (43 characters encoded).
const CODE_VERIFIER_LENGTH: usize = 32;
/// State nonce entropy in bytes.
const STATE_LENGTH: usize = 16;

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// `base64url_nopad(sha256(verifier))`.
pub fn compute_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// A code verifier and its S256 challenge.
#[derive(Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        Self::from_verifier(random_token(CODE_VERIFIER_LENGTH))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parses an `application/x-www-form-urlencoded` query string.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }

    /// Parses the query of a full callback URL such as
    /// `calsync://auth?code=...&state=...`.
    pub fn from_url(raw: &str) -> ProviderResult<Self> {
        let url = url::Url::parse(raw)
            .map_err(|e| ProviderError::authorization(format!("malformed callback URL: {e}")))?;
        Ok(Self::from_query(url.query().unwrap_or_default()))
    }
}

/// State of one authorization attempt.
///
/// The state nonce is single-use: the first callback consumes it whether or
/// not it matches, so a replayed or second callback is always rejected.
#[derive(Debug)]
pub struct OAuthSession {
    provider: ProviderKind,
    state: Option<String>,
    pkce: PkcePair,
    redirect_uri: String,
}

impl OAuthSession {
    pub fn new(provider: ProviderKind, redirect_uri: impl Into<String>) -> Self {
        Self::with_values(
            provider,
            redirect_uri,
            random_token(STATE_LENGTH),
            PkcePair::generate(),
        )
    }

    pub(crate) fn with_values(
        provider: ProviderKind,
        redirect_uri: impl Into<String>,
        state: String,
        pkce: PkcePair,
    ) -> Self {
        Self {
            provider,
            state: Some(state),
            pkce,
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// The nonce to send, or `None` once consumed.
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn code_challenge(&self) -> &str {
        &self.pkce.challenge
    }

    pub fn code_verifier(&self) -> &str {
        &self.pkce.verifier
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Validates a callback and returns its authorization code.
    ///
    /// # Errors
    ///
    /// `AuthorizationFailed` if the provider reported an error, the state does
    /// not match exactly, the nonce was already used, or the code is missing.
    pub fn validate_callback(&mut self, params: &CallbackParams) -> ProviderResult<String> {
        let provider = self.provider.as_str();
        let expected = self.state.take().ok_or_else(|| {
            ProviderError::authorization("authorization state already used").with_provider(provider)
        })?;

        if let Some(ref error) = params.error {
            let detail = params
                .error_description
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default();
            return Err(
                ProviderError::authorization(format!("authorization denied ({error}){detail}"))
                    .with_provider(provider),
            );
        }

        if params.state.as_deref() != Some(expected.as_str()) {
            warn!(%provider, "authorization callback state mismatch");
            return Err(
                ProviderError::authorization("authorization state mismatch").with_provider(provider)
            );
        }

        params
            .code
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ProviderError::authorization("missing authorization code in callback")
                    .with_provider(provider)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;

    fn session() -> OAuthSession {
        OAuthSession::with_values(
            ProviderKind::Google,
            "http://127.0.0.1:1/oauth/callback/google",
            "expected-state".into(),
            PkcePair::generate(),
        )
    }

    fn callback(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn challenge_matches_rfc7636_vector() {
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into());
        assert_eq!(pair.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn generated_values_are_random_and_sized() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_eq!(a.verifier.len(), 43);
        assert_ne!(a.verifier, b.verifier);
        assert_eq!(a.challenge, compute_challenge(&a.verifier));

        let s1 = OAuthSession::new(ProviderKind::Google, "x");
        let s2 = OAuthSession::new(ProviderKind::Google, "x");
        assert_ne!(s1.state(), s2.state());
    }

    #[test]
    fn valid_callback_yields_code() {
        let mut session = session();
        let code = session
            .validate_callback(&callback(Some("abc"), Some("expected-state")))
            .unwrap();
        assert_eq!(code, "abc");
        assert_eq!(session.state(), None);
    }

    #[test]
    fn state_mismatch_is_rejected() {
        let mut session = session();
        let err = session
            .validate_callback(&callback(Some("abc"), Some("forged")))
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::AuthorizationFailed);
        assert!(err.message().contains("mismatch"));
    }

    #[test]
    fn state_is_single_use() {
        let mut session = session();
        let _ = session.validate_callback(&callback(Some("abc"), Some("forged")));
        // Even the right state is refused after the nonce was consumed.
        let err = session
            .validate_callback(&callback(Some("abc"), Some("expected-state")))
            .unwrap_err();
        assert!(err.message().contains("already used"));
    }

    #[test]
    fn missing_code_and_provider_error() {
        let mut session = session();
        let err = session
            .validate_callback(&callback(None, Some("expected-state")))
            .unwrap_err();
        assert!(err.message().contains("missing authorization code"));

        let mut session = self::session();
        let params = CallbackParams {
            error: Some("access_denied".into()),
            error_description: Some("The user denied consent".into()),
            ..callback(None, Some("expected-state"))
        };
        let err = session.validate_callback(&params).unwrap_err();
        assert_eq!(
            err.message(),
            "authorization denied (access_denied): The user denied consent"
        );
    }

    #[test]
    fn parse_callback_query_and_url() {
        let params = CallbackParams::from_query("code=4%2F0Ab&state=xyz&scope=a+b");
        assert_eq!(params.code.as_deref(), Some("4/0Ab"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert_eq!(params.error, None);

        let params = CallbackParams::from_url("calsync://auth?code=c1&state=s1").unwrap();
        assert_eq!(params, callback(Some("c1"), Some("s1")));

        assert!(CallbackParams::from_url("not a url").is_err());
    }

    #[test]
    fn debug_hides_verifier() {
        let pair = PkcePair::from_verifier("super-secret-verifier".into());
        assert!(!format!("{pair:?}").contains("super-secret-verifier"));
    }
}
