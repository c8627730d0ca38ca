//! Drives one interactive authorization from browser launch to stored tokens.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::config::{DEFAULT_CALLBACK_TIMEOUT, OAuthProviderConfig};
use super::pkce::OAuthSession;
use super::transport::{DeepLinkRouter, RedirectTransport};
use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::tokens::{TokenManager, TokenRecord};

/// Observable progress of an authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Init,
    /// The authorization URL is being handed to the browser.
    AwaitingBrowser,
    AwaitingCallback,
    Exchanging,
    Complete,
    Failed(String),
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

/// Opens the authorization URL for the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> ProviderResult<()>;
}

/// Launches the system's default browser.
///
/// If no browser can be started the URL is printed to stderr so the user
/// can open it by hand; the flow keeps waiting either way.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> ProviderResult<()> {
        if let Err(e) = open::that(url) {
            warn!("failed to launch browser: {e}");
            eprintln!("Open this URL in your browser to continue:\n\n  {url}\n");
        }
        Ok(())
    }
}

impl<F> BrowserLauncher for F
where
    F: Fn(&str) -> ProviderResult<()> + Send + Sync,
{
    fn open(&self, url: &str) -> ProviderResult<()> {
        self(url)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OAuthConfig {
    /// How long to wait for the redirect after opening the browser.
    pub callback_timeout: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

/// Runs authorization flows and persists the resulting tokens.
pub struct AuthorizationCoordinator {
    tokens: TokenManager,
    router: DeepLinkRouter,
    browser: Arc<dyn BrowserLauncher>,
    config: OAuthConfig,
    state: watch::Sender<FlowState>,
}

impl std::fmt::Debug for AuthorizationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCoordinator")
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl AuthorizationCoordinator {
    pub fn new(tokens: TokenManager, router: DeepLinkRouter) -> Self {
        let (state, _) = watch::channel(FlowState::Init);
        Self {
            tokens,
            router,
            browser: Arc::new(SystemBrowser),
            config: OAuthConfig::default(),
            state,
        }
    }

    #[must_use]
    pub fn with_browser(mut self, browser: Arc<dyn BrowserLauncher>) -> Self {
        self.browser = browser;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: OAuthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    /// Watches state transitions of the current and future flows.
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: FlowState) {
        debug!(?state, "authorization flow state");
        self.state.send_replace(state);
    }

    /// Runs the full flow for one provider and stores the resulting tokens.
    ///
    /// # Errors
    ///
    /// - `ConfigurationError` if no client id is configured (nothing is opened)
    /// - `AuthorizationFailed` on denial, state mismatch, a missing code or timeout
    /// - `ExchangeFailed` if the relay rejects the code after retries
    pub async fn connect(&self, config: &OAuthProviderConfig) -> ProviderResult<TokenRecord> {
        self.set_state(FlowState::Init);
        match self.run(config).await {
            Ok(record) => {
                self.set_state(FlowState::Complete);
                Ok(record)
            }
            Err(err) => {
                warn!(provider = %config.provider, error = %err, "authorization failed");
                self.set_state(FlowState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn run(&self, config: &OAuthProviderConfig) -> ProviderResult<TokenRecord> {
        let provider = config.provider;
        config.require_client_id()?;

        let mut transport = RedirectTransport::open(config, &self.router).await?;
        let mut session = OAuthSession::new(provider, transport.redirect_uri());
        let url = config.authorization_url(&session)?;

        self.set_state(FlowState::AwaitingBrowser);
        info!(%provider, "opening browser for authorization");
        self.browser.open(url.as_str())?;
        self.set_state(FlowState::AwaitingCallback);

        let callback = tokio::time::timeout(self.config.callback_timeout, transport.recv()).await;
        transport.close();
        let params = callback.map_err(|_| {
            ProviderError::authorization(format!(
                "no authorization callback within {}s",
                self.config.callback_timeout.as_secs()
            ))
            .with_provider(provider.as_str())
        })??;

        let code = session.validate_callback(&params)?;

        self.set_state(FlowState::Exchanging);
        let relay = self.tokens.relay();
        let code = code.as_str();
        let redirect_uri = session.redirect_uri();
        let verifier = session.code_verifier();
        let payload = self
            .tokens
            .retry_policy()
            .run("code exchange", move |_| {
                relay.exchange_code(provider, code, redirect_uri, verifier)
            })
            .await
            .map_err(|err| {
                if err.code() == ProviderErrorCode::ExchangeFailed {
                    err
                } else {
                    err.wrap(ProviderErrorCode::ExchangeFailed, "token exchange failed")
                }
            })?;

        let record = TokenRecord::from_payload(provider, payload, Utc::now());
        self.tokens.store(&record).await?;
        info!(
            %provider,
            account = record.account_email.as_deref().unwrap_or("unknown"),
            "provider connected"
        );
        Ok(record)
    }
}
