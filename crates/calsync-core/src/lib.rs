//! Core types: provider kinds, normalized events, time windows, meeting links

pub mod event;
pub mod links;
pub mod time;
pub mod tracing;

pub use event::{Attendee, CalendarEventRecord, ProviderKind, UnknownProvider};
pub use links::{MeetingKind, MeetingLink, find_meeting_link};
pub use time::{EventTime, TimeWindow};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
