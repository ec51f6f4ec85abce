//! Visual media attached to a page.
//!
//! A page holds at most one [`MediaAttachment`]. External videos may carry
//! a clip window (`clip_start`/`clip_end`, whole seconds) that trims playback.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Durable reference into the asset store (e.g. `image-3`, `audio-0`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind of visual media a page can display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    /// Provider-hosted video referenced by URL
    #[serde(rename = "youtube", alias = "external_video")]
    ExternalVideo,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::ExternalVideo => write!(f, "youtube"),
        }
    }
}

/// Process-local handle a view uses to render a binary asset.
///
/// Never persisted. A `Failed` handle lets the view offer a retry instead
/// of crashing on an unusable blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayHandle {
    Ready(String),
    Failed { reason: String },
}

impl DisplayHandle {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DisplayHandle::Ready(_))
    }

    /// The usable URL, if the handle is ready
    pub fn url(&self) -> Option<&str> {
        match self {
            DisplayHandle::Ready(url) => Some(url),
            DisplayHandle::Failed { .. } => None,
        }
    }
}

/// One visual asset bound to a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    /// Unique within the page
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MediaKind,

    /// Absent until the asset has been persisted
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "storageId")]
    pub storage_ref: Option<AssetRef>,

    /// Canonical origin URL (provider URL for external video)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "url")]
    pub source_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_start: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_end: Option<u32>,

    #[serde(skip)]
    pub display_handle: Option<DisplayHandle>,
}

impl MediaAttachment {
    /// Create an attachment with a fresh id
    pub fn new(kind: MediaKind) -> Self {
        Self {
            id: format!("{}-{}", kind, uuid::Uuid::new_v4().simple()),
            kind,
            storage_ref: None,
            source_url: None,
            title: None,
            clip_start: None,
            clip_end: None,
            display_handle: None,
        }
    }

    pub fn with_storage_ref(mut self, storage_ref: AssetRef) -> Self {
        self.storage_ref = Some(storage_ref);
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Current clip window (only meaningful for external video)
    pub fn clip(&self) -> ClipTiming {
        ClipTiming {
            start: self.clip_start,
            end: self.clip_end,
        }
    }

    pub fn set_clip(&mut self, clip: ClipTiming) {
        self.clip_start = clip.start;
        self.clip_end = clip.end;
    }

    pub fn is_external_video(&self) -> bool {
        self.kind == MediaKind::ExternalVideo
    }
}

/// Which clip boundary is being edited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipField {
    Start,
    End,
}

impl std::fmt::Display for ClipField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClipField::Start => write!(f, "start"),
            ClipField::End => write!(f, "end"),
        }
    }
}

/// Start/end second offsets trimming an external video
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipTiming {
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl ClipTiming {
    /// Build a clip window, rejecting `end <= start`
    pub fn new(start: Option<u32>, end: Option<u32>) -> Result<Self, ClipTimeError> {
        if let (Some(s), Some(e)) = (start, end) {
            if e <= s {
                return Err(ClipTimeError::InvertedRange { start: s, end: e });
            }
        }
        Ok(Self { start, end })
    }

    pub fn get(&self, field: ClipField) -> Option<u32> {
        match field {
            ClipField::Start => self.start,
            ClipField::End => self.end,
        }
    }

    /// Copy with one boundary replaced (unvalidated)
    pub fn with(mut self, field: ClipField, value: Option<u32>) -> Self {
        match field {
            ClipField::Start => self.start = value,
            ClipField::End => self.end = value,
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Errors from clip time parsing and validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipTimeError {
    #[error("Not a valid time: '{0}' (use seconds or mm:ss)")]
    Malformed(String),

    #[error("Seconds must be below 60 in mm:ss: '{0}'")]
    SecondsOutOfRange(String),

    #[error("Clip end ({end}s) must be after clip start ({start}s)")]
    InvertedRange { start: u32, end: u32 },
}

/// Parse a clip time typed by the user.
///
/// Accepts bare seconds (`"90"`) or `mm:ss` (`"1:30"`). The empty string
/// clears the boundary and yields `None`.
pub fn parse_clip_time(raw: &str) -> Result<Option<u32>, ClipTimeError> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    match text.split_once(':') {
        None => {
            if !all_digits(text) {
                return Err(ClipTimeError::Malformed(raw.to_string()));
            }
            text.parse::<u32>()
                .map(Some)
                .map_err(|_| ClipTimeError::Malformed(raw.to_string()))
        }
        Some((minutes, seconds)) => {
            if !all_digits(minutes) || !all_digits(seconds) || seconds.len() > 2 {
                return Err(ClipTimeError::Malformed(raw.to_string()));
            }
            let m: u32 = minutes
                .parse()
                .map_err(|_| ClipTimeError::Malformed(raw.to_string()))?;
            let s: u32 = seconds
                .parse()
                .map_err(|_| ClipTimeError::Malformed(raw.to_string()))?;
            if s >= 60 {
                return Err(ClipTimeError::SecondsOutOfRange(raw.to_string()));
            }
            m.checked_mul(60)
                .and_then(|v| v.checked_add(s))
                .map(Some)
                .ok_or_else(|| ClipTimeError::Malformed(raw.to_string()))
        }
    }
}

/// Format seconds as `m:ss`
pub fn format_clip_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn video_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:youtube(?:-nocookie)?\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/|v/)|youtu\.be/)([A-Za-z0-9_-]{6,})")
            .expect("valid video id regex")
    })
}

fn query_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&](start|end)=(\d+)").expect("valid query regex"))
}

/// Extract a provider video id from any of the common URL shapes
pub fn youtube_video_id(url: &str) -> Option<&str> {
    video_id_regex()
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Canonical watch URL for a provider URL, or `None` if it is not recognized
pub fn canonical_youtube_url(url: &str) -> Option<String> {
    youtube_video_id(url).map(|id| format!("https://www.youtube.com/watch?v={}", id))
}

/// Build the embed URL carrying the clip window as query parameters
pub fn build_embed_url(url: &str, clip: ClipTiming) -> Option<String> {
    let id = youtube_video_id(url)?;
    let mut embed = format!("https://www.youtube.com/embed/{}", id);
    let mut params = Vec::new();
    if let Some(start) = clip.start {
        params.push(format!("start={}", start));
    }
    if let Some(end) = clip.end {
        params.push(format!("end={}", end));
    }
    if !params.is_empty() {
        embed.push('?');
        embed.push_str(&params.join("&"));
    }
    Some(embed)
}

/// Recover a clip window from a previously built embed URL
pub fn clip_from_embed_url(url: &str) -> ClipTiming {
    let mut clip = ClipTiming::default();
    for caps in query_param_regex().captures_iter(url) {
        let value = caps[2].parse::<u32>().ok();
        match &caps[1] {
            "start" => clip.start = value,
            "end" => clip.end = value,
            _ => {}
        }
    }
    clip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_seconds() {
        assert_eq!(parse_clip_time("90"), Ok(Some(90)));
        assert_eq!(parse_clip_time("  0 "), Ok(Some(0)));
    }

    #[test]
    fn test_parse_minutes_seconds() {
        assert_eq!(parse_clip_time("1:30"), Ok(Some(90)));
        assert_eq!(parse_clip_time("03:45"), Ok(Some(225)));
        assert_eq!(parse_clip_time("0:05"), Ok(Some(5)));
    }

    #[test]
    fn test_parse_empty_clears() {
        assert_eq!(parse_clip_time(""), Ok(None));
        assert_eq!(parse_clip_time("   "), Ok(None));
    }

    #[test]
    fn test_parse_rejects_partial_keystrokes() {
        assert!(parse_clip_time("1:").is_err());
        assert!(parse_clip_time(":30").is_err());
        assert!(parse_clip_time("1:3x").is_err());
        assert!(parse_clip_time("-5").is_err());
        assert!(parse_clip_time("1:2:3").is_err());
        assert!(matches!(
            parse_clip_time("1:75"),
            Err(ClipTimeError::SecondsOutOfRange(_))
        ));
    }

    #[test]
    fn test_format_clip_time() {
        assert_eq!(format_clip_time(90), "1:30");
        assert_eq!(format_clip_time(5), "0:05");
        assert_eq!(format_clip_time(600), "10:00");
    }

    #[test]
    fn test_clip_timing_rejects_inverted_range() {
        assert!(ClipTiming::new(Some(10), Some(20)).is_ok());
        assert!(ClipTiming::new(Some(10), None).is_ok());
        assert_eq!(
            ClipTiming::new(Some(20), Some(20)),
            Err(ClipTimeError::InvertedRange { start: 20, end: 20 })
        );
    }

    #[test]
    fn test_video_id_extraction() {
        assert_eq!(
            youtube_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(youtube_video_id("https://youtu.be/dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(
            youtube_video_id("https://www.youtube.com/embed/testId?start=45&end=180"),
            Some("testId")
        );
        assert_eq!(youtube_video_id("https://example.com/video.mp4"), None);
    }

    #[test]
    fn test_embed_url_carries_clip() {
        let clip = ClipTiming::new(Some(45), Some(180)).unwrap();
        assert_eq!(
            build_embed_url("https://www.youtube.com/watch?v=testId", clip).unwrap(),
            "https://www.youtube.com/embed/testId?start=45&end=180"
        );
        assert_eq!(
            build_embed_url("https://youtu.be/testId", ClipTiming::default()).unwrap(),
            "https://www.youtube.com/embed/testId"
        );
    }

    #[test]
    fn test_clip_from_embed_url() {
        let clip = clip_from_embed_url("https://www.youtube.com/embed/testId?start=45&end=180");
        assert_eq!(clip.start, Some(45));
        assert_eq!(clip.end, Some(180));

        let only_end = clip_from_embed_url("https://www.youtube.com/embed/testId?rel=0&end=30");
        assert_eq!(only_end, ClipTiming { start: None, end: Some(30) });
    }

    #[test]
    fn test_attachment_serialization_skips_handle() {
        let mut media = MediaAttachment::new(MediaKind::ExternalVideo)
            .with_source_url("https://www.youtube.com/watch?v=testId");
        media.clip_start = Some(90);
        media.display_handle = Some(DisplayHandle::Ready("blob:x".to_string()));

        let json = serde_json::to_string(&media).unwrap();
        assert!(json.contains("\"type\":\"youtube\""));
        assert!(json.contains("\"clipStart\":90"));
        assert!(!json.contains("blob:x"));

        let parsed: MediaAttachment = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.display_handle, None);
        assert_eq!(parsed.clip_start, Some(90));
    }
}
