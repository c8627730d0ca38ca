//! Meeting link detection.
//!
//! Events carry their conferencing URL in different places depending on the
//! provider and on how the invite was created. This module finds URLs in free
//! text (locations, descriptions), unwraps Outlook SafeLinks and classifies
//! the conferencing service so a video link can be preferred over, say, a
//! link to a shared document.
//!
//! ```
//! use calsync_core::links::{MeetingKind, find_meeting_link};
//!
//! let text = "Agenda: https://docs.example.com/a then https://meet.google.com/abc-defg-hij";
//! let link = find_meeting_link(text).unwrap();
//! assert_eq!(link.kind, MeetingKind::GoogleMeet);
//! assert_eq!(link.url, "https://meet.google.com/abc-defg-hij");
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'\)\]]+"#).expect("Invalid URL regex"));

/// Outlook SafeLinks carry the real target in the `url` query parameter.
static SAFELINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^/]*safelinks\.protection\.outlook\.com/?\?[^?]*url=([^&]+)")
        .expect("Invalid SafeLink regex")
});

static ZOOM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://([^/]*\.)?zoom(gov)?\.(us|com)/").expect("Invalid Zoom regex")
});

static MEET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://meet\.google\.com/").expect("Invalid Meet regex"));

static TEAMS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://teams\.(microsoft\.com|live\.com)/").expect("Invalid Teams regex")
});

static WEBEX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://([^/]*\.)?webex\.com/").expect("Invalid Webex regex")
});

static JITSI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://meet\.jit\.si/").expect("Invalid Jitsi regex"));

/// The conferencing service behind a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingKind {
    Zoom,
    GoogleMeet,
    Teams,
    Webex,
    Jitsi,
    /// A URL that is not a known conferencing service.
    Other,
}

impl MeetingKind {
    /// Returns `true` for known video conferencing services.
    pub fn is_video_conference(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// A URL found in event text, with its detected service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingLink {
    pub kind: MeetingKind,
    pub url: String,
}

/// Classifies a URL after unwrapping SafeLinks.
pub fn classify(url: &str) -> MeetingLink {
    let url = unwrap_safelink(url);
    let kind = if ZOOM_REGEX.is_match(&url) {
        MeetingKind::Zoom
    } else if MEET_REGEX.is_match(&url) {
        MeetingKind::GoogleMeet
    } else if TEAMS_REGEX.is_match(&url) {
        MeetingKind::Teams
    } else if WEBEX_REGEX.is_match(&url) {
        MeetingKind::Webex
    } else if JITSI_REGEX.is_match(&url) {
        MeetingKind::Jitsi
    } else {
        MeetingKind::Other
    };
    MeetingLink { kind, url }
}

/// Returns every URL in `text`, unwrapped and classified, in order of appearance.
pub fn extract_links(text: &str) -> Vec<MeetingLink> {
    URL_REGEX
        .find_iter(text)
        .map(|m| classify(m.as_str()))
        .collect()
}

/// Returns the first conferencing link in `text`, if any.
///
/// Plain URLs (documents, maps) are never treated as meeting links.
pub fn find_meeting_link(text: &str) -> Option<MeetingLink> {
    extract_links(text)
        .into_iter()
        .find(|link| link.kind.is_video_conference())
}

fn unwrap_safelink(url: &str) -> String {
    SAFELINK_REGEX
        .captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|encoded| urlencoding::decode(encoded.as_str()).ok())
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|| url.to_string())
}
