//! Interactive OAuth 2.0 authorization code flow with PKCE.

pub mod config;
pub mod flow;
pub mod pkce;
pub mod transport;

pub use config::{DEFAULT_CALLBACK_TIMEOUT, OAuthProviderConfig};
pub use flow::{AuthorizationCoordinator, BrowserLauncher, FlowState, OAuthConfig, SystemBrowser};
pub use pkce::{CallbackParams, OAuthSession, PkcePair, compute_challenge};
pub use transport::{DeepLinkRouter, LoopbackListener, RedirectTransport, SchemeRegistration};
