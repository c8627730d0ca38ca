//! OAuth-authenticated, multi-provider calendar synchronization.
//!
//! - [`oauth`] - authorization code flow with PKCE over a loopback or
//!   custom-scheme redirect, exchanged through the backend [`relay`]
//! - [`TokenManager`] - stores tokens, refreshes them ahead of expiry and
//!   collapses concurrent refreshes into one
//! - [`RequestThrottle`] - caps and paces outbound provider calls
//! - [`CalendarAggregator`] - fetches every connected calendar in parallel,
//!   normalizes and merges the events, and owns the event-to-notes mapping
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐
//! │ Google API   │   │ Microsoft Graph  │
//! └──────┬───────┘   └────────┬─────────┘
//!        ▼                    ▼
//! ┌──────────────┐   ┌──────────────────┐
//! │ GoogleClient │   │ MicrosoftClient  │  CalendarProvider
//! └──────┬───────┘   └────────┬─────────┘
//!        └────────┬───────────┘
//!                 ▼   RequestThrottle + TokenManager
//!         ┌────────────────────┐
//!         │ CalendarAggregator │──▶ EventNotesMap
//!         └─────────┬──────────┘
//!                   ▼ normalize_events()
//!         ┌────────────────────┐
//!         │ CalendarEventRecord│
//!         └────────────────────┘
//! ```

pub mod aggregator;
pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod mapping;
#[cfg(feature = "microsoft")]
pub mod microsoft;
pub mod normalize;
pub mod oauth;
pub mod provider;
pub mod raw_event;
pub mod relay;
pub mod retry;
pub mod store;
pub mod throttle;
pub mod tokens;

pub use aggregator::{CalendarAggregator, visible_calendars_key};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use mapping::{EventNotesLink, EventNotesMap, MAPPING_KEY};
pub use normalize::{normalize_event, normalize_events};
pub use oauth::{
    AuthorizationCoordinator, BrowserLauncher, DeepLinkRouter, FlowState, OAuthConfig,
    OAuthProviderConfig, SystemBrowser,
};
pub use provider::{BoxFuture, CalendarInfo, CalendarProvider, is_pseudo_calendar};
pub use raw_event::{RawAttendee, RawConferenceData, RawEntryPoint, RawEvent};
pub use relay::{AuthRelay, DEFAULT_RELAY_TIMEOUT, TokenPayload};
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{FileStore, MemoryStore, SecureStore};
pub use throttle::{RequestSlot, RequestThrottle, ThrottleConfig};
pub use tokens::{TokenManager, TokenManagerConfig, TokenRecord};
