//! RawEvent to CalendarEventRecord conversion pipeline.
//!
//! The pipeline:
//! 1. Drops cancelled events, non-meeting event types (out of office, focus
//!    time, working location) and events generated by pseudo-calendars
//! 2. Picks one meeting link: the conference's video entry point, then a
//!    conferencing URL found in the location, then in the description
//! 3. Builds the [`CalendarEventRecord`]

use calsync_core::{Attendee, CalendarEventRecord, ProviderKind, find_meeting_link};
use tracing::trace;

use crate::provider::is_pseudo_calendar;
use crate::raw_event::RawEvent;

/// Converts one provider event, or returns `None` if it is not a meeting.
pub fn normalize_event(
    raw: &RawEvent,
    provider: ProviderKind,
    calendar_id: &str,
) -> Option<CalendarEventRecord> {
    if raw.is_cancelled() {
        trace!(id = %raw.id, "skipping cancelled event");
        return None;
    }
    if !raw.is_default_type() {
        trace!(id = %raw.id, event_type = ?raw.event_type, "skipping non-meeting event");
        return None;
    }
    if [&raw.organizer_email, &raw.creator_email]
        .into_iter()
        .flatten()
        .any(|email| is_pseudo_calendar(email))
    {
        trace!(id = %raw.id, "skipping pseudo-calendar event");
        return None;
    }

    let attendees = raw
        .attendees
        .iter()
        .filter(|a| !a.resource)
        .map(|a| {
            let mut attendee = Attendee::new(&a.email);
            if let Some(ref name) = a.display_name {
                attendee = attendee.with_display_name(name);
            }
            if a.organizer {
                attendee = attendee.as_organizer();
            }
            attendee
        })
        .collect();

    let mut event = CalendarEventRecord::new(
        &raw.id,
        raw.effective_title(),
        raw.start.clone(),
        raw.end.clone(),
        provider,
        calendar_id,
    )
    .with_attendees(attendees);

    if let Some(link) = meeting_link(raw) {
        event = event.with_meeting_link(link);
    }
    if let Some(ref location) = raw.location {
        event = event.with_location(location);
    }
    if let Some(ref html_link) = raw.html_link {
        event = event.with_html_link(html_link);
    }

    Some(event)
}

/// Picks the link used to join the meeting.
fn meeting_link(raw: &RawEvent) -> Option<String> {
    if let Some(uri) = raw.conference_data.as_ref().and_then(|cd| cd.video_uri()) {
        return Some(uri.to_string());
    }
    [raw.location.as_deref(), raw.description.as_deref()]
        .into_iter()
        .flatten()
        .find_map(find_meeting_link)
        .map(|link| link.url)
}

/// Normalizes a batch, dropping everything that is not a meeting.
pub fn normalize_events(
    raw_events: &[RawEvent],
    provider: ProviderKind,
    calendar_id: &str,
) -> Vec<CalendarEventRecord> {
    raw_events
        .iter()
        .filter_map(|raw| normalize_event(raw, provider, calendar_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_event::{RawAttendee, RawConferenceData, RawEntryPoint};
    use calsync_core::EventTime;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn sample_raw_event() -> RawEvent {
        RawEvent::new(
            "evt-123",
            EventTime::from_utc(Utc.with_ymd_and_hms(2025, 2, 5, 10, 0, 0).unwrap()),
            EventTime::from_utc(Utc.with_ymd_and_hms(2025, 2, 5, 11, 0, 0).unwrap()),
        )
        .with_summary("Team Meeting")
    }

    fn normalize(raw: &RawEvent) -> Option<CalendarEventRecord> {
        normalize_event(raw, ProviderKind::Google, "primary")
    }

    mod filtering {
        use super::*;

        #[test]
        fn keeps_default_and_untyped_events() {
            assert!(normalize(&sample_raw_event()).is_some());
            assert!(normalize(&sample_raw_event().with_event_type("default")).is_some());
        }

        #[test]
        fn drops_non_meeting_types() {
            for kind in ["outOfOffice", "workingLocation", "focusTime", "birthday"] {
                assert!(normalize(&sample_raw_event().with_event_type(kind)).is_none(), "{kind}");
            }
        }

        #[test]
        fn drops_cancelled() {
            assert!(normalize(&sample_raw_event().with_status("cancelled")).is_none());
            assert!(normalize(&sample_raw_event().with_status("tentative")).is_some());
        }

        #[test]
        fn drops_pseudo_calendar_events() {
            let birthday = sample_raw_event()
                .with_organizer("addressbook#contacts@group.v.calendar.google.com");
            assert!(normalize(&birthday).is_none());

            let holiday = sample_raw_event()
                .with_creator("en.usa#holiday@group.v.calendar.google.com");
            assert!(normalize(&holiday).is_none());
        }

        #[test]
        fn batch_skips_filtered_events() {
            let events = vec![
                sample_raw_event(),
                sample_raw_event().with_status("cancelled"),
                sample_raw_event().with_event_type("focusTime"),
            ];
            assert_eq!(
                normalize_events(&events, ProviderKind::Microsoft, "cal").len(),
                1
            );
        }
    }

    mod fields {
        use super::*;

        #[test]
        fn normalizes_minimal_event() {
            let event = normalize(&sample_raw_event()).unwrap();
            assert_eq!(event.id, "evt-123");
            assert_eq!(event.title, "Team Meeting");
            assert_eq!(event.calendar_id, "primary");
            assert_eq!(event.provider, ProviderKind::Google);
            assert_eq!(event.meeting_link, None);
            assert!(!event.is_all_day());
        }

        #[test]
        fn all_day_and_fallback_title() {
            let date = NaiveDate::from_ymd_opt(2025, 2, 5).unwrap();
            let raw = RawEvent::new(
                "evt-allday",
                EventTime::from_date(date),
                EventTime::from_date(date.succ_opt().unwrap()),
            );
            let event = normalize(&raw).unwrap();
            assert!(event.is_all_day());
            assert_eq!(event.title, "(No title)");
        }

        #[test]
        fn resources_are_not_attendees() {
            let mut organizer = RawAttendee::new("boss@example.com");
            organizer.organizer = true;
            organizer.display_name = Some("Boss".into());
            let mut room = RawAttendee::new("room@resource.example.com");
            room.resource = true;

            let event = normalize(
                &sample_raw_event()
                    .with_attendee(organizer)
                    .with_attendee(room)
                    .with_attendee(RawAttendee::new("me@example.com")),
            )
            .unwrap();

            assert_eq!(event.attendees.len(), 2);
            let organizer = event.organizer().unwrap();
            assert_eq!(organizer.email, "boss@example.com");
            assert_eq!(organizer.display_name.as_deref(), Some("Boss"));
        }
    }

    mod meeting_links {
        use super::*;

        fn meet_conference(uri: &str) -> RawConferenceData {
            RawConferenceData {
                solution_name: Some("Google Meet".to_string()),
                entry_points: vec![
                    RawEntryPoint {
                        entry_point_type: "phone".to_string(),
                        uri: Some("tel:+1-555-0100".to_string()),
                    },
                    RawEntryPoint::video(uri),
                ],
            }
        }

        #[test]
        fn conference_video_entry_wins() {
            let raw = sample_raw_event()
                .with_conference_data(meet_conference("https://meet.google.com/xyz-uvwx-rst"))
                .with_location("https://zoom.us/j/1")
                .with_description("https://teams.microsoft.com/l/meetup-join/2");
            assert_eq!(
                normalize(&raw).unwrap().meeting_link.as_deref(),
                Some("https://meet.google.com/xyz-uvwx-rst")
            );
        }

        #[test]
        fn location_before_description() {
            let raw = sample_raw_event()
                .with_location("Room 4 / https://zoom.us/j/123456789")
                .with_description("Fallback https://meet.google.com/abc-defg-hij");
            assert_eq!(
                normalize(&raw).unwrap().meeting_link.as_deref(),
                Some("https://zoom.us/j/123456789")
            );
        }

        #[test]
        fn description_when_location_has_none() {
            let raw = sample_raw_event()
                .with_location("https://maps.example.com/office")
                .with_description("Agenda: https://docs.example.com\nJoin https://meet.google.com/abc-defg-hij");
            let event = normalize(&raw).unwrap();
            assert_eq!(
                event.meeting_link.as_deref(),
                Some("https://meet.google.com/abc-defg-hij")
            );
            assert_eq!(
                event.location.as_deref(),
                Some("https://maps.example.com/office")
            );
        }

        #[test]
        fn no_link_when_only_plain_urls() {
            let raw = sample_raw_event().with_description("See https://docs.example.com/plan");
            assert_eq!(normalize(&raw).unwrap().meeting_link, None);
        }
    }
}
