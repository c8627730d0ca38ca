//! Microsoft 365 / Outlook calendar provider over Microsoft Graph.

mod client;

pub use client::{GRAPH_API_BASE, MicrosoftCalendarClient};
