//! Microsoft Graph v1.0 calendar client.

use std::time::Duration;

use calsync_core::{EventTime, ProviderKind, TimeWindow};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, CalendarInfo, CalendarProvider};
use crate::raw_event::{RawAttendee, RawConferenceData, RawEntryPoint, RawEvent};

/// Base URL for Microsoft Graph v1.0.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Asks Graph to return every `dateTime` in UTC.
const PREFER_UTC: &str = "outlook.timezone=\"UTC\"";

/// Graph's calendarView page size cap.
const PAGE_SIZE: &str = "100";

/// Stateless Microsoft Graph calendar client.
#[derive(Debug, Clone)]
pub struct MicrosoftCalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl MicrosoftCalendarClient {
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
            base_url: GRAPH_API_BASE.to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn calendar_view_url(&self, calendar_id: &str) -> String {
        if calendar_id == "primary" {
            format!("{}/me/calendarView", self.base_url)
        } else {
            format!(
                "{}/me/calendars/{}/calendarView",
                self.base_url,
                urlencoding::encode(calendar_id)
            )
        }
    }

    /// Lists event instances overlapping `window`, following `@odata.nextLink`.
    pub async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
    ) -> ProviderResult<Vec<RawEvent>> {
        let first = self
            .http
            .get(self.calendar_view_url(calendar_id))
            .query(&[
                ("startDateTime", window.start_rfc3339()),
                ("endDateTime", window.end_rfc3339()),
                ("$top", PAGE_SIZE.to_string()),
            ]);

        let mut events = Vec::new();
        let mut page: GraphPage<GraphEvent> = self.send_json(first, access_token).await?;
        loop {
            events.extend(page.value.into_iter().filter_map(convert_event));
            let Some(next) = page.next_link else {
                break;
            };
            page = self.send_json(self.http.get(&next), access_token).await?;
        }

        debug!("fetched {} events from calendar {}", events.len(), calendar_id);
        Ok(events)
    }

    /// Lists the user's calendars.
    pub async fn list_calendars(&self, access_token: &str) -> ProviderResult<Vec<CalendarInfo>> {
        let mut calendars = Vec::new();
        let mut page: GraphPage<GraphCalendar> = self
            .send_json(
                self.http.get(format!("{}/me/calendars", self.base_url)),
                access_token,
            )
            .await?;
        loop {
            calendars.extend(page.value.into_iter().map(|cal| {
                let role = if cal.can_edit { "writer" } else { "reader" };
                CalendarInfo::new(cal.id, cal.name)
                    .with_primary(cal.is_default_calendar)
                    .with_access_role(role)
            }));
            let Some(next) = page.next_link else {
                break;
            };
            page = self.send_json(self.http.get(&next), access_token).await?;
        }
        Ok(calendars)
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        access_token: &str,
    ) -> ProviderResult<T> {
        let response = request
            .bearer_auth(access_token)
            .header("Prefer", PREFER_UTC)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ProviderError::network(format!("failed to read response: {e}")).with_source(e)
        })?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse response: {e}")).with_source(e)
        })
    }
}

impl CalendarProvider for MicrosoftCalendarClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Microsoft
    }

    fn list_calendars<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(async move {
            MicrosoftCalendarClient::list_calendars(self, access_token)
                .await
                .map_err(|e| e.with_provider("microsoft"))
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
                .map_err(|e| e.with_provider("microsoft"))
        })
    }
}

/// Parses a Graph `dateTimeTimeZone`. With the UTC preference the value
/// carries no offset, e.g. `2024-03-15T10:00:00.0000000`.
fn parse_time(time: &GraphDateTime, all_day: bool, event_id: &str) -> Option<EventTime> {
    let parsed = NaiveDateTime::parse_from_str(&time.date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| warn!("event {event_id}: failed to parse time {}: {e}", time.date_time))
        .ok()?;
    if !time.time_zone.as_deref().is_none_or(|tz| tz.eq_ignore_ascii_case("UTC")) {
        warn!(
            "event {event_id}: unexpected time zone {:?}, treating as UTC",
            time.time_zone
        );
    }
    Some(if all_day {
        EventTime::from_date(parsed.date())
    } else {
        EventTime::from_utc(parsed.and_utc())
    })
}

/// Maps Graph's `showAs` to the event types used elsewhere.
fn event_type_for(show_as: Option<&str>) -> Option<String> {
    match show_as {
        Some("oof") => Some("outOfOffice".to_string()),
        Some("workingElsewhere") => Some("workingLocation".to_string()),
        _ => None,
    }
}

fn convert_event(event: GraphEvent) -> Option<RawEvent> {
    let start = parse_time(&event.start, event.is_all_day, &event.id)?;
    let end = parse_time(&event.end, event.is_all_day, &event.id)?;

    let mut raw = RawEvent::new(event.id, start, end);
    raw.summary = event.subject;
    raw.description = event
        .body
        .and_then(|b| b.content)
        .filter(|c| !c.trim().is_empty())
        .or(event.body_preview);
    raw.location = event
        .location
        .and_then(|l| l.display_name)
        .filter(|l| !l.is_empty());
    raw.html_link = event.web_link;
    if event.is_cancelled {
        raw.status = Some("cancelled".to_string());
    }
    raw.event_type = event_type_for(event.show_as.as_deref());
    raw.organizer_email = event.organizer.and_then(|o| o.email_address.address);
    raw.attendees = event
        .attendees
        .into_iter()
        .filter_map(|a| {
            let resource = a.kind.as_deref() == Some("resource");
            let mut attendee = RawAttendee::new(a.email_address.address?);
            attendee.display_name = a.email_address.name;
            attendee.resource = resource;
            Some(attendee)
        })
        .collect();
    if let Some(ref organizer) = raw.organizer_email {
        for attendee in &mut raw.attendees {
            attendee.organizer = attendee.email.eq_ignore_ascii_case(organizer);
        }
    }
    raw.conference_data = event
        .online_meeting
        .and_then(|m| m.join_url)
        .map(|url| RawConferenceData {
            solution_name: event.online_meeting_provider,
            entry_points: vec![RawEntryPoint::video(url)],
        });

    Some(raw)
}

#[derive(Debug, Deserialize)]
struct GraphPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    subject: Option<String>,
    body_preview: Option<String>,
    body: Option<GraphBody>,
    start: GraphDateTime,
    end: GraphDateTime,
    location: Option<GraphLocation>,
    #[serde(default)]
    is_all_day: bool,
    #[serde(default)]
    is_cancelled: bool,
    show_as: Option<String>,
    web_link: Option<String>,
    organizer: Option<GraphRecipient>,
    #[serde(default)]
    attendees: Vec<GraphAttendee>,
    online_meeting: Option<GraphOnlineMeeting>,
    online_meeting_provider: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttendee {
    email_address: GraphEmailAddress,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphOnlineMeeting {
    join_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphCalendar {
    id: String,
    name: String,
    #[serde(default)]
    is_default_calendar: bool,
    #[serde(default)]
    can_edit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use chrono::{NaiveDate, TimeZone, Utc};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> MicrosoftCalendarClient {
        MicrosoftCalendarClient::new(Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri())
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap(),
        )
    }

    fn teams_event() -> serde_json::Value {
        serde_json::json!({
            "id": "AAMk1",
            "subject": "Design review",
            "bodyPreview": "Agenda",
            "start": { "dateTime": "2024-03-15T10:00:00.0000000", "timeZone": "UTC" },
            "end": { "dateTime": "2024-03-15T11:00:00.0000000", "timeZone": "UTC" },
            "location": { "displayName": "Room 4" },
            "isCancelled": false,
            "showAs": "busy",
            "webLink": "https://outlook.office365.com/owa/?itemid=AAMk1",
            "organizer": { "emailAddress": { "name": "Ada", "address": "ada@example.com" } },
            "attendees": [
                { "type": "required", "emailAddress": { "name": "Ada", "address": "ada@example.com" } },
                { "type": "resource", "emailAddress": { "name": "Room 4", "address": "room4@example.com" } }
            ],
            "onlineMeetingProvider": "teamsForBusiness",
            "onlineMeeting": { "joinUrl": "https://teams.microsoft.com/l/meetup-join/19%3ameeting" }
        })
    }

    #[test]
    fn converts_teams_event() {
        let event = convert_event(serde_json::from_value(teams_event()).unwrap()).unwrap();
        assert_eq!(
            event.start,
            EventTime::from_utc(Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap())
        );
        assert_eq!(event.summary.as_deref(), Some("Design review"));
        assert_eq!(event.location.as_deref(), Some("Room 4"));
        assert_eq!(event.organizer_email.as_deref(), Some("ada@example.com"));
        assert!(event.attendees[0].organizer);
        assert!(event.attendees[1].resource);
        assert_eq!(event.event_type, None);
        assert!(!event.is_cancelled());
        let cd = event.conference_data.unwrap();
        assert_eq!(cd.solution_name.as_deref(), Some("teamsForBusiness"));
        assert_eq!(
            cd.video_uri(),
            Some("https://teams.microsoft.com/l/meetup-join/19%3ameeting")
        );
    }

    #[test]
    fn converts_all_day_cancelled_and_out_of_office() {
        let mut json = teams_event();
        json["isAllDay"] = serde_json::json!(true);
        json["isCancelled"] = serde_json::json!(true);
        json["showAs"] = serde_json::json!("oof");
        json["start"]["dateTime"] = serde_json::json!("2024-03-15T00:00:00.0000000");
        json["end"]["dateTime"] = serde_json::json!("2024-03-16T00:00:00.0000000");

        let event = convert_event(serde_json::from_value(json).unwrap()).unwrap();
        assert_eq!(
            event.start,
            EventTime::from_date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert!(event.is_cancelled());
        assert_eq!(event.event_type.as_deref(), Some("outOfOffice"));
        assert!(!event.is_default_type());
    }

    #[tokio::test]
    async fn primary_uses_me_calendar_view_and_follows_next_link() {
        let server = MockServer::start().await;
        let next = format!("{}/me/calendarView?$skip=1", server.uri());
        Mock::given(method("GET"))
            .and(path("/me/calendarView"))
            .and(query_param("$skip", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{
                    "id": "AAMk2",
                    "start": { "dateTime": "2024-03-15T12:00:00", "timeZone": "UTC" },
                    "end": { "dateTime": "2024-03-15T13:00:00", "timeZone": "UTC" }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/calendarView"))
            .and(query_param("startDateTime", "2024-03-15T00:00:00Z"))
            .and(query_param("endDateTime", "2024-03-16T00:00:00Z"))
            .and(header("prefer", "outlook.timezone=\"UTC\""))
            .and(header("authorization", "Bearer at-ms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [teams_event()],
                "@odata.nextLink": next,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let events = client(&server)
            .fetch_events("at-ms", "primary", window())
            .await
            .unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["AAMk1", "AAMk2"]);
    }

    #[tokio::test]
    async fn secondary_calendar_path_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/calendars/cal-2/calendarView"))
            .respond_with(ResponseTemplate::new(404).set_body_string("ErrorItemNotFound"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/calendars/cal-3/calendarView"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/calendars/cal-4/calendarView"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.fetch_events("t", "cal-2", window()).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::NotFound);
        assert_eq!(err.provider(), Some("microsoft"));
        let err = client.fetch_events("t", "cal-3", window()).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::AuthenticationFailed);
        let err = client.fetch_events("t", "cal-4", window()).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::ServerError);
    }

    #[tokio::test]
    async fn lists_calendars() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/calendars"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [
                    { "id": "AQMk-default", "name": "Calendar", "isDefaultCalendar": true, "canEdit": true },
                    { "id": "AQMk-shared", "name": "Team", "canEdit": false }
                ]
            })))
            .mount(&server)
            .await;

        let calendars = CalendarProvider::list_calendars(&client(&server), "t")
            .await
            .unwrap();
        assert_eq!(calendars.len(), 2);
        assert!(calendars[0].is_primary);
        assert_eq!(calendars[0].access_role.as_deref(), Some("writer"));
        assert_eq!(calendars[1].access_role.as_deref(), Some("reader"));
    }

    #[tokio::test]
    async fn annotation_is_unsupported() {
        let server = MockServer::start().await;
        let err = client(&server)
            .annotate_event("t", "primary", "AAMk1", "note")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::Unsupported);
    }
}
