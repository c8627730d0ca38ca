//! The [`CalendarProvider`] trait implemented by each REST client.
//!
//! Providers are stateless with respect to credentials: the caller passes a
//! fresh access token on every call. Token refresh and request throttling
//! live in [`TokenManager`](crate::tokens::TokenManager) and
//! [`RequestThrottle`](crate::throttle::RequestThrottle) so every provider
//! shares them.

use std::future::Future;
use std::pin::Pin;

use calsync_core::{ProviderKind, TimeWindow};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};
use crate::raw_event::RawEvent;

/// Google's auto-generated contacts (birthdays) calendar.
pub const CONTACTS_CALENDAR_MARKER: &str = "#contacts@";
/// Google's public holiday calendars.
pub const HOLIDAY_CALENDAR_MARKER: &str = "#holiday@";

/// Returns `true` for ids or emails of generated pseudo-calendars that hold
/// no real meetings.
pub fn is_pseudo_calendar(id_or_email: &str) -> bool {
    id_or_email.contains(CONTACTS_CALENDAR_MARKER) || id_or_email.contains(HOLIDAY_CALENDAR_MARKER)
}

/// A calendar visible to the connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_primary: bool,
    /// "owner", "writer", "reader" or "freeBusyReader" on Google.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_role: Option<String>,
    /// IANA time zone of the calendar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl CalendarInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_primary: false,
            access_role: None,
            timezone: None,
        }
    }

    #[must_use]
    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    #[must_use]
    pub fn with_access_role(mut self, role: impl Into<String>) -> Self {
        self.access_role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

/// A boxed future, so the trait stays object-safe for `Arc<dyn CalendarProvider>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A calendar REST backend.
pub trait CalendarProvider: Send + Sync {
    /// Which service this client talks to.
    fn kind(&self) -> ProviderKind;

    /// The id that addresses the account's default calendar.
    fn primary_calendar_id(&self) -> &str {
        "primary"
    }

    /// Lists the calendars the account can see.
    fn list_calendars<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarInfo>>>;

    /// Fetches events of one calendar overlapping `window`, expanding
    /// recurring events into instances and following pagination.
    ///
    /// # Errors
    ///
    /// `PermissionDenied`/`NotFound` when the calendar is not readable,
    /// `RateLimited` on 429, `AuthenticationFailed` on 401.
    fn fetch_events<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>>;

    /// Writes a notes reference back onto the provider event.
    ///
    /// Providers without write support keep the default, which reports
    /// `Unsupported`.
    fn annotate_event<'a>(
        &'a self,
        _access_token: &'a str,
        _calendar_id: &'a str,
        _event_id: &'a str,
        _notes_ref: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        let kind = self.kind();
        Box::pin(async move {
            Err(ProviderError::unsupported("event annotation is not supported")
                .with_provider(kind.as_str()))
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted in-memory provider for aggregator and client tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    pub struct ScriptedProvider {
        kind: ProviderKind,
        calendars: Vec<CalendarInfo>,
        events: HashMap<String, ProviderResult<Vec<RawEvent>>>,
        delays: HashMap<String, Duration>,
        pub seen_tokens: Mutex<Vec<String>>,
        pub annotated: Mutex<Vec<(String, String)>>,
        pub supports_annotation: bool,
    }

    impl ScriptedProvider {
        pub fn new(kind: ProviderKind) -> Self {
            Self {
                kind,
                calendars: Vec::new(),
                events: HashMap::new(),
                delays: HashMap::new(),
                seen_tokens: Mutex::new(Vec::new()),
                annotated: Mutex::new(Vec::new()),
                supports_annotation: false,
            }
        }

        pub fn with_calendar(mut self, info: CalendarInfo) -> Self {
            self.calendars.push(info);
            self
        }

        pub fn with_events(mut self, calendar_id: &str, events: Vec<RawEvent>) -> Self {
            self.events.insert(calendar_id.to_string(), Ok(events));
            self
        }

        pub fn with_error(mut self, calendar_id: &str, err: ProviderError) -> Self {
            self.events.insert(calendar_id.to_string(), Err(err));
            self
        }

        pub fn with_delay(mut self, calendar_id: &str, delay: Duration) -> Self {
            self.delays.insert(calendar_id.to_string(), delay);
            self
        }
    }

    impl CalendarProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn list_calendars<'a>(
            &'a self,
            access_token: &'a str,
        ) -> BoxFuture<'a, ProviderResult<Vec<CalendarInfo>>> {
            Box::pin(async move {
                self.seen_tokens.lock().unwrap().push(access_token.to_string());
                Ok(self.calendars.clone())
            })
        }

        fn fetch_events<'a>(
            &'a self,
            access_token: &'a str,
            calendar_id: &'a str,
            _window: TimeWindow,
        ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
            Box::pin(async move {
                self.seen_tokens.lock().unwrap().push(access_token.to_string());
                if let Some(delay) = self.delays.get(calendar_id) {
                    tokio::time::sleep(*delay).await;
                }
                match self.events.get(calendar_id) {
                    Some(result) => result.clone(),
                    None => Err(ProviderError::not_found(format!(
                        "calendar {calendar_id} not found"
                    ))),
                }
            })
        }

        fn annotate_event<'a>(
            &'a self,
            _access_token: &'a str,
            _calendar_id: &'a str,
            event_id: &'a str,
            notes_ref: &'a str,
        ) -> BoxFuture<'a, ProviderResult<()>> {
            Box::pin(async move {
                if !self.supports_annotation {
                    return Err(ProviderError::unsupported("no write support"));
                }
                self.annotated
                    .lock()
                    .unwrap()
                    .push((event_id.to_string(), notes_ref.to_string()));
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;

    struct ReadOnly;

    impl CalendarProvider for ReadOnly {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Google
        }

        fn list_calendars<'a>(
            &'a self,
            _access_token: &'a str,
        ) -> BoxFuture<'a, ProviderResult<Vec<CalendarInfo>>> {
            Box::pin(async { Ok(vec![CalendarInfo::new("primary", "Me").with_primary(true)]) })
        }

        fn fetch_events<'a>(
            &'a self,
            _access_token: &'a str,
            _calendar_id: &'a str,
            _window: TimeWindow,
        ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[test]
    fn pseudo_calendar_markers() {
        assert!(is_pseudo_calendar(
            "addressbook#contacts@group.v.calendar.google.com"
        ));
        assert!(is_pseudo_calendar(
            "en.usa#holiday@group.v.calendar.google.com"
        ));
        assert!(!is_pseudo_calendar("team@group.calendar.google.com"));
        assert!(!is_pseudo_calendar("primary"));
    }

    #[tokio::test]
    async fn default_annotation_is_unsupported() {
        let provider = ReadOnly;
        let err = provider
            .annotate_event("tok", "primary", "evt", "notes-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::Unsupported);
        assert_eq!(err.provider(), Some("google"));
        assert_eq!(provider.primary_calendar_id(), "primary");
    }

    #[tokio::test]
    async fn trait_objects_are_usable() {
        let provider: std::sync::Arc<dyn CalendarProvider> = std::sync::Arc::new(ReadOnly);
        let calendars = provider.list_calendars("tok").await.unwrap();
        assert_eq!(calendars.len(), 1);
        assert!(calendars[0].is_primary);
    }
}
