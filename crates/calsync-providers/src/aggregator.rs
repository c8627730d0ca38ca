//! Fan-out over every connected account and calendar, fan-in into one
//! ordered event list.
//!
//! Each (provider, calendar) pair is fetched concurrently with a fresh token
//! and a throttle slot. A failing calendar is logged and contributes nothing;
//! it never hides the others. The merged result is sorted by start time with
//! provider, calendar id and event id as tie-breakers, so it does not depend
//! on which fetch finished first.

use std::collections::BTreeMap;
use std::sync::Arc;

use calsync_core::{CalendarEventRecord, ProviderKind, TimeWindow};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::mapping::{EventNotesLink, EventNotesMap};
use crate::normalize::normalize_events;
use crate::provider::{CalendarInfo, CalendarProvider, is_pseudo_calendar};
use crate::store::{SecureStore, get_json, set_json};
use crate::throttle::RequestThrottle;
use crate::tokens::{TokenManager, TokenRecord};

/// Store key of a provider's visible calendar selection.
pub fn visible_calendars_key(provider: ProviderKind) -> String {
    format!("visible_calendars:{}", provider.as_str())
}

/// Merges events from all connected providers and owns the notes mapping.
pub struct CalendarAggregator {
    tokens: TokenManager,
    throttle: RequestThrottle,
    providers: BTreeMap<ProviderKind, Arc<dyn CalendarProvider>>,
    store: Arc<dyn SecureStore>,
    mapping: EventNotesMap,
}

impl std::fmt::Debug for CalendarAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarAggregator")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("throttle", &self.throttle.config())
            .finish()
    }
}

impl CalendarAggregator {
    /// Selections and the notes mapping share the token manager's store.
    pub fn new(tokens: TokenManager, throttle: RequestThrottle) -> Self {
        let store = tokens.store_handle();
        Self {
            mapping: EventNotesMap::new(store.clone()),
            tokens,
            throttle,
            providers: BTreeMap::new(),
            store,
        }
    }

    /// Registers the client for its provider, replacing any earlier one.
    #[must_use]
    pub fn with_provider(mut self, client: Arc<dyn CalendarProvider>) -> Self {
        self.providers.insert(client.kind(), client);
        self
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    fn client(&self, provider: ProviderKind) -> ProviderResult<&Arc<dyn CalendarProvider>> {
        self.providers.get(&provider).ok_or_else(|| {
            ProviderError::configuration(format!("no client registered for {provider}"))
                .with_provider(provider.as_str())
        })
    }

    /// Connected providers that also have a registered client.
    pub async fn connected_providers(&self) -> ProviderResult<Vec<ProviderKind>> {
        Ok(self
            .tokens
            .connected_providers()
            .await?
            .into_iter()
            .filter(|p| self.providers.contains_key(p))
            .collect())
    }

    async fn require_token(&self, provider: ProviderKind) -> ProviderResult<TokenRecord> {
        self.tokens.load_fresh(provider).await?.ok_or_else(|| {
            ProviderError::authentication(format!("{provider} is not connected"))
                .with_provider(provider.as_str())
        })
    }

    /// Calendars of a connected account, without generated pseudo-calendars.
    pub async fn list_calendars(&self, provider: ProviderKind) -> ProviderResult<Vec<CalendarInfo>> {
        let client = self.client(provider)?;
        let token = self.require_token(provider).await?;
        let _slot = self.throttle.acquire().await;
        let calendars = client.list_calendars(&token.access_token).await?;
        Ok(calendars
            .into_iter()
            .filter(|c| !is_pseudo_calendar(&c.id))
            .collect())
    }

    /// The stored selection, possibly empty.
    pub async fn visible_calendars(&self, provider: ProviderKind) -> ProviderResult<Vec<String>> {
        Ok(
            get_json::<Vec<String>>(self.store.as_ref(), &visible_calendars_key(provider))
                .await?
                .unwrap_or_default(),
        )
    }

    /// Replaces the selection. An empty selection means "primary only".
    pub async fn set_visible_calendars(
        &self,
        provider: ProviderKind,
        calendar_ids: &[String],
    ) -> ProviderResult<()> {
        let ids: Vec<&String> = calendar_ids
            .iter()
            .filter(|id| !is_pseudo_calendar(id))
            .collect();
        if ids.len() != calendar_ids.len() {
            debug!(%provider, "ignoring pseudo-calendars in selection");
        }
        set_json(self.store.as_ref(), &visible_calendars_key(provider), &ids).await?;
        info!(%provider, count = ids.len(), "visible calendars updated");
        Ok(())
    }

    /// The calendars to query: the selection if any, else the primary calendar.
    async fn calendars_to_fetch(&self, provider: ProviderKind, client: &dyn CalendarProvider) -> Vec<String> {
        let selected = self.visible_calendars(provider).await.unwrap_or_else(|e| {
            warn!(%provider, error = %e, "failed to read calendar selection, using primary");
            Vec::new()
        });
        let selected: Vec<String> = selected
            .into_iter()
            .filter(|id| !is_pseudo_calendar(id))
            .collect();
        if selected.is_empty() {
            vec![client.primary_calendar_id().to_string()]
        } else {
            selected
        }
    }

    /// Events of every connected account overlapping `window`, merged and sorted.
    ///
    /// # Errors
    ///
    /// Only a failure to enumerate connected providers is returned; per
    /// provider and per calendar failures are logged and skipped.
    pub async fn fetch_events(&self, window: TimeWindow) -> ProviderResult<Vec<CalendarEventRecord>> {
        let providers = self.connected_providers().await?;
        debug!(providers = providers.len(), "fetching calendars");

        // A slow refresh for one account must not hold up the others.
        let jobs = providers
            .into_iter()
            .map(|provider| self.fetch_provider(provider, window));
        let mut events: Vec<CalendarEventRecord> = join_all(jobs).await.into_iter().flatten().collect();
        events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        info!(count = events.len(), "aggregated events");
        Ok(events)
    }

    /// Token, calendar selection, then every selected calendar concurrently.
    async fn fetch_provider(&self, provider: ProviderKind, window: TimeWindow) -> Vec<CalendarEventRecord> {
        let Ok(client) = self.client(provider) else {
            return Vec::new();
        };
        let token = match self.tokens.load_fresh(provider).await {
            Ok(Some(token)) => token,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(%provider, error = %err, "skipping provider: no usable token");
                return Vec::new();
            }
        };

        let calendars = self.calendars_to_fetch(provider, client.as_ref()).await;
        debug!(%provider, calendars = calendars.len(), "fetching provider calendars");
        let jobs = calendars.into_iter().map(|calendar_id| {
            self.fetch_calendar(provider, client.as_ref(), token.clone(), calendar_id, window)
        });
        join_all(jobs).await.into_iter().flatten().collect()
    }

    async fn fetch_calendar(
        &self,
        provider: ProviderKind,
        client: &dyn CalendarProvider,
        token: TokenRecord,
        calendar_id: String,
        window: TimeWindow,
    ) -> Vec<CalendarEventRecord> {
        let result = async {
            let token = self.tokens.ensure_fresh(&token).await?;
            let _slot = self.throttle.acquire().await;
            client
                .fetch_events(&token.access_token, &calendar_id, window)
                .await
        }
        .await;

        match result {
            Ok(raw) => {
                let events = normalize_events(&raw, provider, &calendar_id);
                debug!(%provider, calendar = %calendar_id, fetched = raw.len(), kept = events.len(), "calendar fetched");
                events
            }
            Err(err) if err.code().is_access_denied() => {
                warn!(%provider, calendar = %calendar_id, error = %err, "calendar not accessible, skipping");
                Vec::new()
            }
            Err(err) => {
                warn!(%provider, calendar = %calendar_id, error = %err, "failed to fetch calendar");
                Vec::new()
            }
        }
    }

    /// Links an event of the provider's primary calendar to notes.
    pub async fn link(
        &self,
        event_id: &str,
        notes_id: &str,
        provider: ProviderKind,
    ) -> ProviderResult<EventNotesLink> {
        let calendar_id = self.client(provider)?.primary_calendar_id().to_string();
        self.link_in_calendar(event_id, notes_id, provider, &calendar_id)
            .await
    }

    /// Links a fetched event to notes, writing back into its own calendar.
    pub async fn link_event(
        &self,
        event: &CalendarEventRecord,
        notes_id: &str,
    ) -> ProviderResult<EventNotesLink> {
        self.link_in_calendar(&event.id, notes_id, event.provider, &event.calendar_id)
            .await
    }

    /// Stores the link, then tries to annotate the provider event.
    ///
    /// The stored link is the source of truth: write-back is skipped for
    /// read-only grants and its failures are only logged.
    async fn link_in_calendar(
        &self,
        event_id: &str,
        notes_id: &str,
        provider: ProviderKind,
        calendar_id: &str,
    ) -> ProviderResult<EventNotesLink> {
        let link = self.mapping.link(event_id, notes_id, provider).await?;
        info!(%provider, event_id, notes_id, "event linked to notes");
        self.write_back(event_id, notes_id, provider, calendar_id).await;
        Ok(link)
    }

    async fn write_back(&self, event_id: &str, notes_id: &str, provider: ProviderKind, calendar_id: &str) {
        let token = match self.tokens.load_fresh(provider).await {
            Ok(Some(token)) => token,
            Ok(None) => return,
            Err(err) => {
                warn!(%provider, error = %err, "skipping write-back: no usable token");
                return;
            }
        };
        if token.is_read_only() {
            debug!(%provider, "read-only grant, skipping write-back");
            return;
        }
        let Ok(client) = self.client(provider) else {
            return;
        };

        let _slot = self.throttle.acquire().await;
        match client
            .annotate_event(&token.access_token, calendar_id, event_id, notes_id)
            .await
        {
            Ok(()) => debug!(%provider, event_id, "notes reference written to event"),
            Err(err) if err.code() == ProviderErrorCode::Unsupported => {
                debug!(%provider, "provider does not support write-back")
            }
            Err(err) => warn!(%provider, event_id, error = %err, "write-back failed"),
        }
    }

    /// Notes linked to a calendar event.
    pub async fn notes_for(&self, event_id: &str) -> ProviderResult<Option<String>> {
        self.mapping.get(event_id).await
    }

    /// Calendar event linked to notes.
    pub async fn event_for(&self, notes_id: &str) -> ProviderResult<Option<String>> {
        self.mapping.reverse_lookup(notes_id).await
    }
}
