//! Time types for calendar events.
//!
//! [`EventTime`] represents an event boundary, either a concrete instant or an
//! all-day date. [`TimeWindow`] is the half-open range used for provider queries.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The start or end of a calendar event.
///
/// Providers report either a timestamp with an offset (stored here in UTC)
/// or a bare date for all-day events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A specific instant, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day date without a time component.
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates a `DateTime` variant from a UTC instant.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates a `DateTime` variant from an instant in any timezone.
    pub fn from_local<Tz: TimeZone>(dt: DateTime<Tz>) -> Self {
        Self::DateTime(dt.with_timezone(&Utc))
    }

    /// Creates an `AllDay` variant.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Returns `true` for all-day times.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Converts to a UTC instant for ordering.
    ///
    /// All-day dates sort at midnight UTC.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// Returns the calendar date of this time.
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::DateTime(dt) => dt.date_naive(),
            Self::AllDay(date) => *date,
        }
    }

    /// Returns `true` if this time lies strictly before `dt`.
    pub fn is_before_utc(&self, dt: DateTime<Utc>) -> bool {
        self.to_utc_datetime() < dt
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime()
            .cmp(&other.to_utc_datetime())
            // An all-day event on a date sorts before a timed event at midnight.
            .then_with(|| other.is_all_day().cmp(&self.is_all_day()))
    }
}

/// A query range `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "TimeWindow start must be <= end");
        Self { start, end }
    }

    /// Creates a window starting at `now` and spanning `duration`.
    pub fn from_now(now: DateTime<Utc>, duration: Duration) -> Self {
        Self::new(now, now + duration)
    }

    /// Creates the window `[now, now + hours)`.
    pub fn upcoming_hours(hours: i64) -> Self {
        Self::from_now(Utc::now(), Duration::hours(hours.max(0)))
    }

    /// Returns `true` if `dt` falls inside the window.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        dt >= self.start && dt < self.end
    }

    /// Returns `true` if an event spanning `[start, end)` overlaps the window.
    pub fn overlaps(&self, start: &EventTime, end: &EventTime) -> bool {
        start.to_utc_datetime() < self.end && end.to_utc_datetime() > self.start
    }

    /// RFC 3339 rendering of the start, as accepted by REST calendar APIs.
    pub fn start_rfc3339(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// RFC 3339 rendering of the end.
    pub fn end_rfc3339(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
