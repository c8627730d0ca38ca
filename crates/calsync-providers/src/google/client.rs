//! Google Calendar API v3 client.

use std::time::Duration;

use calsync_core::{EventTime, ProviderKind, TimeWindow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, CalendarInfo, CalendarProvider};
use crate::raw_event::{RawAttendee, RawConferenceData, RawEntryPoint, RawEvent};

/// Base URL for Google Calendar API v3.
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Private extended property holding the linked notes id.
pub const NOTES_PROPERTY: &str = "calsyncNotesId";

/// Stateless Google Calendar client. The access token is passed per call.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl GoogleCalendarClient {
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {e}"))
                    .with_source(e)
            })?;
        Ok(Self {
            http,
            base_url: CALENDAR_API_BASE.to_string(),
        })
    }

    /// Points the client at another API root (a mock server in tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Lists events overlapping `window`, following `nextPageToken`.
    pub async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
    ) -> ProviderResult<Vec<RawEvent>> {
        let mut all_events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .list_events_page(access_token, calendar_id, window, page_token.as_deref())
                .await?;

            all_events.extend(page.items.into_iter().filter_map(convert_event));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("fetched {} events from calendar {}", all_events.len(), calendar_id);
        Ok(all_events)
    }

    async fn list_events_page(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
        page_token: Option<&str>,
    ) -> ProviderResult<EventListResponse> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        );

        let mut request = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("timeMin", window.start_rfc3339()),
                ("timeMax", window.end_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        self.send_json(request).await
    }

    /// Lists the calendars on the user's calendar list.
    pub async fn list_calendars(&self, access_token: &str) -> ProviderResult<Vec<CalendarInfo>> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let list: CalendarListResponse = self
            .send_json(self.http.get(&url).bearer_auth(access_token))
            .await?;

        Ok(list
            .items
            .into_iter()
            .map(|entry| {
                let mut info = CalendarInfo::new(entry.id, entry.summary_override.unwrap_or(entry.summary))
                    .with_primary(entry.primary);
                if let Some(role) = entry.access_role {
                    info = info.with_access_role(role);
                }
                if let Some(tz) = entry.time_zone {
                    info = info.with_timezone(tz);
                }
                info
            })
            .collect())
    }

    /// Stores `notes_ref` as a private extended property on the event.
    pub async fn patch_notes_property(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        notes_ref: &str,
    ) -> ProviderResult<()> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base_url,
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id)
        );
        let body = serde_json::json!({
            "extendedProperties": { "private": { (NOTES_PROPERTY): notes_ref } }
        });
        let response = self
            .http
            .patch(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        check_status(response).await.map(|_| ())
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ProviderResult<T> {
        let response = request.send().await.map_err(ProviderError::from_reqwest)?;
        let body = check_status(response).await?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse response: {e}")).with_source(e)
        })
    }
}

/// Returns the body of a successful response, or the mapped status error.
async fn check_status(response: reqwest::Response) -> ProviderResult<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::network(format!("failed to read response: {e}")).with_source(e))?;
    if !status.is_success() {
        return Err(ProviderError::from_status(status, &body));
    }
    Ok(body)
}

impl CalendarProvider for GoogleCalendarClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn list_calendars<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(async move {
            GoogleCalendarClient::list_calendars(self, access_token)
                .await
                .map_err(|e| e.with_provider("google"))
        })
    }

    fn fetch_events<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(async move {
            self.list_events(access_token, calendar_id, window)
                .await
                .map_err(|e| e.with_provider("google"))
        })
    }

    fn annotate_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        event_id: &'a str,
        notes_ref: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.patch_notes_property(access_token, calendar_id, event_id, notes_ref)
                .await
                .map_err(|e| e.with_provider("google"))
        })
    }
}

fn parse_time(time: &ApiEventTime, event_id: &str) -> Option<EventTime> {
    match (&time.date_time, &time.date) {
        (Some(dt), _) => DateTime::parse_from_rfc3339(dt)
            .map(EventTime::from_local)
            .map_err(|e| warn!("event {event_id}: failed to parse time {dt}: {e}"))
            .ok(),
        (None, Some(date)) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(EventTime::from_date)
            .map_err(|e| warn!("event {event_id}: failed to parse date {date}: {e}"))
            .ok(),
        (None, None) => {
            warn!("event {event_id} has no start or end time");
            None
        }
    }
}

/// Converts an API event to a [`RawEvent`]. Filtering happens later, in
/// normalization.
fn convert_event(event: ApiEvent) -> Option<RawEvent> {
    let id = event.id?;
    let start = parse_time(&event.start, &id)?;
    let end = parse_time(&event.end, &id)?;

    let mut raw = RawEvent::new(id, start, end);
    raw.summary = event.summary;
    raw.description = event.description;
    raw.location = event.location;
    raw.html_link = event.html_link;
    raw.status = event.status;
    raw.event_type = event.event_type;
    raw.organizer_email = event.organizer.and_then(|p| p.email);
    raw.creator_email = event.creator.and_then(|p| p.email);
    raw.attendees = event
        .attendees
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| {
            Some(RawAttendee {
                email: a.email?,
                display_name: a.display_name,
                organizer: a.organizer.unwrap_or(false),
                resource: a.resource.unwrap_or(false),
            })
        })
        .collect();
    raw.conference_data = event.conference_data.map(|cd| RawConferenceData {
        solution_name: cd.conference_solution.map(|cs| cs.name),
        entry_points: cd
            .entry_points
            .unwrap_or_default()
            .into_iter()
            .map(|ep| RawEntryPoint {
                entry_point_type: ep.entry_point_type,
                uri: ep.uri,
            })
            .collect(),
    });

    Some(raw)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: ApiEventTime,
    end: ApiEventTime,
    html_link: Option<String>,
    status: Option<String>,
    event_type: Option<String>,
    organizer: Option<ApiPerson>,
    creator: Option<ApiPerson>,
    attendees: Option<Vec<ApiAttendee>>,
    conference_data: Option<ApiConferenceData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiPerson {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAttendee {
    email: Option<String>,
    display_name: Option<String>,
    organizer: Option<bool>,
    resource: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiConferenceData {
    conference_solution: Option<ApiConferenceSolution>,
    entry_points: Option<Vec<ApiEntryPoint>>,
}

#[derive(Debug, Deserialize)]
struct ApiConferenceSolution {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEntryPoint {
    entry_point_type: String,
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: String,
    summary_override: Option<String>,
    #[serde(default)]
    primary: bool,
    access_role: Option<String>,
    time_zone: Option<String>,
}
