//! Raw event data as returned by a provider REST API.
//!
//! Provider clients translate their wire format into [`RawEvent`]; the
//! [`normalize`](crate::normalize) pipeline then filters and converts it into
//! a [`CalendarEventRecord`](calsync_core::CalendarEventRecord).

use calsync_core::EventTime;

/// Google's `eventType` for ordinary meetings. Anything else (out of office,
/// focus time, working location, birthdays) is not a meeting.
pub const DEFAULT_EVENT_TYPE: &str = "default";

/// An attendee as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttendee {
    pub email: String,
    pub display_name: Option<String>,
    pub organizer: bool,
    /// Rooms and equipment are listed as attendees by both providers.
    pub resource: bool,
}

impl RawAttendee {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            organizer: false,
            resource: false,
        }
    }
}

/// Conferencing attached to an event (Meet, Teams, Zoom add-on).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConferenceData {
    pub solution_name: Option<String>,
    pub entry_points: Vec<RawEntryPoint>,
}

/// One way of joining a conference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntryPoint {
    /// "video", "phone", "sip" or "more".
    pub entry_point_type: String,
    pub uri: Option<String>,
}

impl RawEntryPoint {
    pub fn video(uri: impl Into<String>) -> Self {
        Self {
            entry_point_type: "video".to_string(),
            uri: Some(uri.into()),
        }
    }
}

impl RawConferenceData {
    /// The URI of the first video entry point, if any.
    pub fn video_uri(&self) -> Option<&str> {
        self.entry_points
            .iter()
            .filter(|ep| ep.entry_point_type == "video")
            .find_map(|ep| ep.uri.as_deref())
    }
}

/// A calendar event before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub id: String,
    pub start: EventTime,
    pub end: EventTime,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub html_link: Option<String>,
    /// "confirmed", "tentative" or "cancelled".
    pub status: Option<String>,
    /// Provider event type; `None` means an ordinary event.
    pub event_type: Option<String>,
    pub attendees: Vec<RawAttendee>,
    pub organizer_email: Option<String>,
    pub creator_email: Option<String>,
    pub conference_data: Option<RawConferenceData>,
}

impl RawEvent {
    pub fn new(id: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            summary: None,
            description: None,
            location: None,
            html_link: None,
            status: None,
            event_type: None,
            attendees: Vec::new(),
            organizer_email: None,
            creator_email: None,
            conference_data: None,
        }
    }

    /// The summary, or "(No title)" when absent or blank.
    pub fn effective_title(&self) -> &str {
        self.summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("(No title)")
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    /// Returns `true` for ordinary meetings.
    pub fn is_default_type(&self) -> bool {
        self.event_type
            .as_deref()
            .is_none_or(|t| t == DEFAULT_EVENT_TYPE)
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    #[must_use]
    pub fn with_organizer(mut self, email: impl Into<String>) -> Self {
        self.organizer_email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_creator(mut self, email: impl Into<String>) -> Self {
        self.creator_email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_attendee(mut self, attendee: RawAttendee) -> Self {
        self.attendees.push(attendee);
        self
    }

    #[must_use]
    pub fn with_conference_data(mut self, data: RawConferenceData) -> Self {
        self.conference_data = Some(data);
        self
    }
}
