//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/calsync/config.toml` by default:
//!
//! ```toml
//! [relay]
//! base_url = "https://relay.example.com"
//!
//! [google]
//! client_id = "env::CALSYNC_GOOGLE_CLIENT_ID"
//!
//! [microsoft]
//! client_id = "pass::calsync/microsoft-client-id"
//! redirect_uri = "calsync://auth/microsoft"
//!
//! [sync]
//! hours = 24
//! poll_interval = 300
//!
//! [storage]
//! dir = "/home/me/.local/share/calsync"
//! ```
//!
//! `client_id` values support secret references (see [`crate::secret`]).
//! The relay holds the client secrets; none are configured here.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use calsync_core::ProviderKind;
use calsync_providers::{
    AuthRelay, CalendarAggregator, DEFAULT_RELAY_TIMEOUT, FileStore, OAuthProviderConfig,
    RequestThrottle, SecureStore, ThrottleConfig, TokenManager, TokenManagerConfig,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::poller::PollerConfig;

/// Configuration for the `calsync` client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub relay: RelaySettings,
    pub google: ProviderSettings,
    pub microsoft: ProviderSettings,
    pub sync: SyncSettings,
    pub storage: StorageSettings,
}

/// Backend relay that performs code exchange and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub base_url: Option<String>,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_RELAY_TIMEOUT.as_secs(),
        }
    }
}

/// OAuth client settings for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Public OAuth client id (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,

    /// Fixed redirect URI. A custom scheme is delivered through the
    /// deep-link router, an `http` URI is bound as given, and when unset
    /// an ephemeral loopback port is used.
    pub redirect_uri: Option<String>,
}

/// Fetch window, polling and throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Hours ahead covered by `events` and `watch`.
    pub hours: i64,
    /// Seconds between `watch` polls.
    pub poll_interval: u64,
    /// Maximum concurrent provider requests.
    pub max_concurrent: usize,
    /// Milliseconds between a released and a resumed request.
    pub spacing_ms: u64,
    /// Provider API timeout in seconds.
    pub request_timeout: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let throttle = ThrottleConfig::default();
        Self {
            hours: 24,
            poll_interval: 300,
            max_concurrent: throttle.max_concurrent,
            spacing_ms: throttle.spacing.as_millis() as u64,
            request_timeout: 30,
        }
    }
}

/// Where tokens, calendar selections and notes links are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Loads configuration from the default path, or defaults if it does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ClientResult<Self> {
        toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("failed to parse config: {e}")))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
            .join("config.toml")
    }

    /// Returns the default data directory.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage
            .dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    pub fn provider(&self, provider: ProviderKind) -> &ProviderSettings {
        match provider {
            ProviderKind::Google => &self.google,
            ProviderKind::Microsoft => &self.microsoft,
        }
    }

    /// OAuth settings for `provider` with secret references resolved.
    pub fn oauth_config(&self, provider: ProviderKind) -> ClientResult<OAuthProviderConfig> {
        let settings = self.provider(provider);
        let client_id = crate::secret::resolve_optional(settings.client_id.as_deref())
            .map_err(|e| ClientError::Config(format!("failed to resolve {provider}.client_id: {e}")))?;

        let mut config = OAuthProviderConfig::for_provider(provider, client_id);
        if let Some(ref uri) = settings.redirect_uri {
            config = config.with_redirect_uri(uri);
        }
        Ok(config)
    }

    pub fn relay(&self) -> ClientResult<AuthRelay> {
        let base_url = self.relay.base_url.as_deref().ok_or_else(|| {
            ClientError::Config(format!(
                "relay.base_url is not set. Add to {}:\n  [relay]\n  base_url = \"https://your-relay.example.com\"",
                Self::default_path().display()
            ))
        })?;
        Ok(AuthRelay::new(base_url, Duration::from_secs(self.relay.timeout))?)
    }

    pub fn store(&self) -> Arc<dyn SecureStore> {
        Arc::new(FileStore::new(self.storage_dir()))
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig::default()
            .with_max_concurrent(self.sync.max_concurrent)
            .with_spacing(Duration::from_millis(self.sync.spacing_ms))
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig::new(Duration::from_secs(self.sync.poll_interval))
    }

    pub fn token_manager(&self) -> ClientResult<TokenManager> {
        Ok(TokenManager::new(
            self.store(),
            self.relay()?,
            TokenManagerConfig::default(),
        ))
    }

    /// Builds the aggregator with a client for every compiled-in provider.
    pub fn aggregator(&self) -> ClientResult<CalendarAggregator> {
        let throttle = RequestThrottle::new(self.throttle_config());
        #[allow(unused_mut)]
        let mut aggregator = CalendarAggregator::new(self.token_manager()?, throttle);
        #[allow(unused_variables)]
        let timeout = Duration::from_secs(self.sync.request_timeout);

        #[cfg(feature = "google")]
        {
            let client = calsync_providers::google::GoogleCalendarClient::new(timeout)?;
            aggregator = aggregator.with_provider(Arc::new(client));
        }
        #[cfg(feature = "microsoft")]
        {
            let client = calsync_providers::microsoft::MicrosoftCalendarClient::new(timeout)?;
            aggregator = aggregator.with_provider(Arc::new(client));
        }

        Ok(aggregator)
    }
}
