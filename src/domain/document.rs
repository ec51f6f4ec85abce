//! The course document tree.
//!
//! A document is a fixed welcome page, a fixed learning-objectives page and
//! an ordered list of topics. Pages sit behind `Arc` so a patch can swap a
//! single page while every sibling stays pointer-identical.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::media::{AssetRef, MediaAttachment};
use super::narration::BlockNumber;

/// Page identifier (`welcome`, `objectives`, or a topic id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub const WELCOME: &'static str = "welcome";
    pub const OBJECTIVES: &'static str = "objectives";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn welcome() -> Self {
        Self(Self::WELCOME.to_string())
    }

    pub fn objectives() -> Self {
        Self(Self::OBJECTIVES.to_string())
    }

    /// Conventional id of the topic at `index`
    pub fn topic(index: usize) -> Self {
        Self(format!("topic-{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a page lives in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlot {
    Welcome,
    Objectives,
    Topic(usize),
}

impl PageSlot {
    /// Positional index used for narration storage ids
    /// (welcome = 0, objectives = 1, topic i = i + 2)
    pub fn storage_index(&self) -> usize {
        match self {
            PageSlot::Welcome => 0,
            PageSlot::Objectives => 1,
            PageSlot::Topic(i) => i + 2,
        }
    }
}

/// A node of the course document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: PageId,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub content: String,

    /// Narration text read aloud for this page
    #[serde(default)]
    pub narration: String,

    /// At most one attachment after any add
    #[serde(default)]
    pub media: Vec<MediaAttachment>,

    /// Stored narration audio
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "audioId")]
    pub audio_ref: Option<AssetRef>,

    /// Stored narration captions
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "captionId")]
    pub caption_ref: Option<AssetRef>,

    /// Block number the narration assets were matched by
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<BlockNumber>,
}

impl Page {
    pub fn new(id: impl Into<PageId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: String::new(),
            narration: String::new(),
            media: Vec::new(),
            audio_ref: None,
            caption_ref: None,
            block_number: None,
        }
    }

    pub fn with_narration(mut self, narration: impl Into<String>) -> Self {
        self.narration = narration.into();
        self
    }

    pub fn with_media(mut self, media: MediaAttachment) -> Self {
        self.media = vec![media];
        self
    }

    pub fn has_narration(&self) -> bool {
        !self.narration.trim().is_empty()
    }
}

impl From<String> for PageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The structured course document handed to the export step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDocument {
    #[serde(default)]
    pub title: String,

    pub welcome_page: Arc<Page>,

    #[serde(alias = "learningObjectivesPage")]
    pub objectives_page: Arc<Page>,

    #[serde(default)]
    pub topics: Vec<Arc<Page>>,
}

impl CourseDocument {
    /// Build a document with empty welcome/objectives pages and no topics
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            welcome_page: Arc::new(Page::new(PageId::welcome(), "Welcome")),
            objectives_page: Arc::new(Page::new(PageId::objectives(), "Learning Objectives")),
            topics: Vec::new(),
        }
    }

    pub fn with_welcome(mut self, page: Page) -> Self {
        self.welcome_page = Arc::new(page);
        self
    }

    pub fn with_objectives(mut self, page: Page) -> Self {
        self.objectives_page = Arc::new(page);
        self
    }

    pub fn with_topic(mut self, page: Page) -> Self {
        self.topics.push(Arc::new(page));
        self
    }

    /// Parse a document from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse course document")
    }

    /// Load a document from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid document: {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize course document")
    }

    /// Locate a page by id. Welcome/objectives match their fixed slot ids
    /// as well as whatever id the stored page carries.
    pub fn locate(&self, page_id: &PageId) -> Option<PageSlot> {
        if page_id.as_str() == PageId::WELCOME || self.welcome_page.id == *page_id {
            return Some(PageSlot::Welcome);
        }
        if page_id.as_str() == PageId::OBJECTIVES || self.objectives_page.id == *page_id {
            return Some(PageSlot::Objectives);
        }
        self.topics
            .iter()
            .position(|t| t.id == *page_id)
            .map(PageSlot::Topic)
    }

    pub fn page(&self, page_id: &PageId) -> Option<&Arc<Page>> {
        self.locate(page_id).and_then(|slot| self.page_at(slot))
    }

    pub fn page_at(&self, slot: PageSlot) -> Option<&Arc<Page>> {
        match slot {
            PageSlot::Welcome => Some(&self.welcome_page),
            PageSlot::Objectives => Some(&self.objectives_page),
            PageSlot::Topic(i) => self.topics.get(i),
        }
    }

    /// Pages in fixed document order: welcome, objectives, topics
    pub fn pages(&self) -> impl Iterator<Item = (PageSlot, &Arc<Page>)> {
        [
            (PageSlot::Welcome, &self.welcome_page),
            (PageSlot::Objectives, &self.objectives_page),
        ]
        .into_iter()
        .chain(
            self.topics
                .iter()
                .enumerate()
                .map(|(i, t)| (PageSlot::Topic(i), t)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> CourseDocument {
        CourseDocument::new("Safety 101")
            .with_topic(Page::new("topic-0", "Hazards"))
            .with_topic(Page::new("topic-1", "Equipment"))
    }

    #[test]
    fn test_locate_pages() {
        let doc = sample_document();
        assert_eq!(doc.locate(&PageId::welcome()), Some(PageSlot::Welcome));
        assert_eq!(doc.locate(&PageId::objectives()), Some(PageSlot::Objectives));
        assert_eq!(doc.locate(&PageId::from("topic-1")), Some(PageSlot::Topic(1)));
        assert_eq!(doc.locate(&PageId::from("topic-9")), None);
    }

    #[test]
    fn test_pages_in_document_order() {
        let doc = sample_document();
        let ids: Vec<&str> = doc.pages().map(|(_, p)| p.id.as_str()).collect();
        assert_eq!(ids, vec!["welcome", "objectives", "topic-0", "topic-1"]);
    }

    #[test]
    fn test_storage_index() {
        assert_eq!(PageSlot::Welcome.storage_index(), 0);
        assert_eq!(PageSlot::Objectives.storage_index(), 1);
        assert_eq!(PageSlot::Topic(0).storage_index(), 2);
        assert_eq!(PageSlot::Topic(5).storage_index(), 7);
    }

    #[test]
    fn test_parses_legacy_field_names() {
        let json = r#"{
            "title": "Course",
            "welcomePage": { "id": "welcome", "title": "Hi", "narration": "Hello", "media": [] },
            "learningObjectivesPage": { "id": "objectives", "title": "Goals", "audioId": "audio-1" },
            "topics": [
                { "id": "topic-0", "title": "One", "media": [
                    { "id": "image-0", "type": "image", "storageId": "image-0", "url": "https://example.com/a.png" }
                ] }
            ]
        }"#;

        let doc = CourseDocument::from_json(json).unwrap();
        assert_eq!(doc.objectives_page.audio_ref, Some(AssetRef::from("audio-1")));
        let media = &doc.topics[0].media[0];
        assert_eq!(media.storage_ref, Some(AssetRef::from("image-0")));
        assert_eq!(media.source_url.as_deref(), Some("https://example.com/a.png"));
    }
}
