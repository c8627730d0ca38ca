//! Google Calendar provider.
//!
//! [`GoogleCalendarClient`] talks to the Calendar API v3 with an access token
//! supplied on every call. Authorization and refresh happen elsewhere, in
//! [`oauth`](crate::oauth) and [`tokens`](crate::tokens).

mod client;

pub use client::{CALENDAR_API_BASE, GoogleCalendarClient, NOTES_PROPERTY};
