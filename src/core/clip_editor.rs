//! Clip-timing editor.
//!
//! Tracks what the user is typing into an external video's start/end
//! fields separately from the committed clip window. A field moves
//! `Idle -> Editing` on input, `Editing -> Committing` when a blur parses
//! cleanly, and back to `Idle` once the grace delay has passed and the
//! buffer is cleared by [`ClipTimingEditor::tick`].
//!
//! Persistence goes through an [`Outbox`]: committing only queues a
//! [`PendingPatch`], and the queue is drained against the store separately.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adapters::{AssetStore, MetadataPatch};
use crate::domain::{
    build_embed_url, format_clip_time, parse_clip_time, AssetRef, ClipField, ClipTimeError,
    ClipTiming, MediaAttachment,
};

/// Errors surfaced next to the clip field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipEditError {
    #[error(transparent)]
    Time(#[from] ClipTimeError),

    #[error("Media '{0}' is not an external video")]
    NotExternalVideo(String),
}

/// Per-field edit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Editing,
    Committing,
}

/// Grace delay and outbox tick interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorTiming {
    /// Delay before a committed field's buffer is dropped (default: 150ms)
    #[serde(default = "default_clip_grace_ms")]
    pub clip_grace_ms: u64,

    /// Interval of the session ticker (default: 50ms)
    #[serde(default = "default_outbox_tick_ms")]
    pub outbox_tick_ms: u64,
}

fn default_clip_grace_ms() -> u64 {
    150
}
fn default_outbox_tick_ms() -> u64 {
    50
}

impl Default for EditorTiming {
    fn default() -> Self {
        Self {
            clip_grace_ms: default_clip_grace_ms(),
            outbox_tick_ms: default_outbox_tick_ms(),
        }
    }
}

impl EditorTiming {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.clip_grace_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.outbox_tick_ms.max(1))
    }
}

/// A clip window waiting to be written to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPatch {
    pub media_id: String,
    pub asset_ref: AssetRef,
    pub clip: ClipTiming,
    pub embed_url: Option<String>,
}

impl PendingPatch {
    fn metadata_patch(&self) -> MetadataPatch {
        MetadataPatch {
            clip_start: Some(self.clip.start),
            clip_end: Some(self.clip.end),
            embed_url: self.embed_url.clone().map(Some),
            title: None,
        }
    }
}

/// Pending persistence, coalesced per media id (last write wins)
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<PendingPatch>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, patch: PendingPatch) {
        match self.pending.iter_mut().find(|p| p.media_id == patch.media_id) {
            Some(existing) => *existing = patch,
            None => self.pending.push(patch),
        }
    }

    /// Put back a patch that failed to persist, unless a newer one for the
    /// same media has been queued meanwhile
    pub fn requeue(&mut self, patch: PendingPatch) {
        if !self.pending.iter().any(|p| p.media_id == patch.media_id) {
            self.pending.push(patch);
        }
    }

    pub fn drain(&mut self) -> Vec<PendingPatch> {
        std::mem::take(&mut self.pending)
    }

    /// Drop anything queued for `media_id`
    pub fn discard(&mut self, media_id: &str) {
        self.pending.retain(|p| p.media_id != media_id);
    }

    pub fn pending(&self) -> &[PendingPatch] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of one persistence pass
#[derive(Debug, Default)]
pub struct FlushReport {
    pub persisted: usize,
    /// Transient failures, to be retried on a later flush
    pub retry: Vec<PendingPatch>,
    /// Permanent failures, dropped after logging
    pub dropped: Vec<PendingPatch>,
}

/// Write drained patches to the store
pub async fn persist_patches(store: &dyn AssetStore, patches: Vec<PendingPatch>) -> FlushReport {
    let mut report = FlushReport::default();
    for patch in patches {
        match store
            .update_metadata(&patch.asset_ref, patch.metadata_patch())
            .await
        {
            Ok(()) => {
                debug!(media = %patch.media_id, asset_ref = %patch.asset_ref, "Persisted clip timing");
                report.persisted += 1;
            }
            Err(e) if e.is_transient() => {
                warn!(media = %patch.media_id, error = %e, "Clip timing persist failed, will retry");
                report.retry.push(patch);
            }
            Err(e) => {
                error!(media = %patch.media_id, error = %e, "Clip timing persist failed");
                report.dropped.push(patch);
            }
        }
    }
    report
}

#[derive(Debug, Clone)]
struct FieldBuffer {
    text: String,
    state: EditState,
    clear_at: Option<Instant>,
}

/// Edit buffers, fallback table and outbox for clip timing
#[derive(Debug, Default)]
pub struct ClipTimingEditor {
    timing: EditorTiming,
    buffers: HashMap<(String, ClipField), FieldBuffer>,
    last_good: HashMap<String, ClipTiming>,
    outbox: Outbox,
}

impl ClipTimingEditor {
    pub fn new(timing: EditorTiming) -> Self {
        Self {
            timing,
            ..Default::default()
        }
    }

    pub fn timing(&self) -> EditorTiming {
        self.timing
    }

    pub fn state(&self, media_id: &str, field: ClipField) -> EditState {
        self.buffers
            .get(&(media_id.to_string(), field))
            .map(|b| b.state)
            .unwrap_or(EditState::Idle)
    }

    /// Raw text currently buffered for a field
    pub fn buffer(&self, media_id: &str, field: ClipField) -> Option<&str> {
        self.buffers
            .get(&(media_id.to_string(), field))
            .map(|b| b.text.as_str())
    }

    /// Seed the fallback table from a loaded attachment
    pub fn remember(&mut self, media: &MediaAttachment) {
        if media.is_external_video() && !media.clip().is_empty() {
            self.last_good.insert(media.id.clone(), media.clip());
        }
    }

    pub fn last_known_good(&self, media_id: &str) -> Option<ClipTiming> {
        self.last_good.get(media_id).copied()
    }

    /// Store the text verbatim. Never touches the committed value.
    pub fn on_input(&mut self, media_id: &str, field: ClipField, raw: &str) {
        let buffer = self
            .buffers
            .entry((media_id.to_string(), field))
            .or_insert_with(|| FieldBuffer {
                text: String::new(),
                state: EditState::Editing,
                clear_at: None,
            });
        buffer.text = raw.to_string();
        buffer.state = EditState::Editing;
        buffer.clear_at = None;
    }

    /// Commit the buffered text for one field.
    ///
    /// On success the attachment's clip window is updated, a persist is
    /// queued when the attachment has been stored, and the buffer is
    /// scheduled to clear at `now + grace`. On failure the buffer is left
    /// as typed and nothing is queued.
    pub fn on_blur(
        &mut self,
        media_id: &str,
        field: ClipField,
        media: &mut MediaAttachment,
        now: Instant,
    ) -> Result<ClipTiming, ClipEditError> {
        if !media.is_external_video() {
            return Err(ClipEditError::NotExternalVideo(media_id.to_string()));
        }

        let key = (media_id.to_string(), field);
        let Some(buffer) = self.buffers.get(&key) else {
            return Ok(media.clip());
        };
        if buffer.state != EditState::Editing {
            return Ok(media.clip());
        }

        let value = parse_clip_time(&buffer.text).map_err(|e| {
            debug!(media = media_id, %field, error = %e, "Clip time did not parse");
            e
        })?;

        let other = match field {
            ClipField::Start => ClipField::End,
            ClipField::End => ClipField::Start,
        };
        let other_value = media
            .clip()
            .get(other)
            .or_else(|| self.last_good.get(media_id).and_then(|c| c.get(other)));

        let clip = match field {
            ClipField::Start => ClipTiming::new(value, other_value),
            ClipField::End => ClipTiming::new(other_value, value),
        }
        .map_err(|e| {
            info!(media = media_id, %field, error = %e, "Partial clip timing, boundary not committed");
            e
        })?;

        media.set_clip(clip);
        self.last_good.insert(media_id.to_string(), clip);

        if let Some(asset_ref) = media.storage_ref.clone() {
            let embed_url = media
                .source_url
                .as_deref()
                .and_then(|url| build_embed_url(url, clip));
            self.outbox.enqueue(PendingPatch {
                media_id: media_id.to_string(),
                asset_ref,
                clip,
                embed_url,
            });
        }

        if let Some(buffer) = self.buffers.get_mut(&key) {
            buffer.state = EditState::Committing;
            buffer.clear_at = Some(now + self.timing.grace());
        }

        debug!(media = media_id, %field, ?clip, "Committed clip timing");
        Ok(clip)
    }

    /// Drop committed buffers whose grace delay has passed. Returns how
    /// many were cleared.
    pub fn tick(&mut self, now: Instant) -> usize {
        let before = self.buffers.len();
        self.buffers.retain(|_, b| {
            !(b.state == EditState::Committing && b.clear_at.is_some_and(|at| at <= now))
        });
        before - self.buffers.len()
    }

    /// Text to show in a field: edit buffer, else committed value, else
    /// last known good, else empty
    pub fn display_value(&self, media: &MediaAttachment, field: ClipField) -> String {
        if let Some(text) = self.buffer(&media.id, field) {
            return text.to_string();
        }
        media
            .clip()
            .get(field)
            .or_else(|| self.last_good.get(&media.id).and_then(|c| c.get(field)))
            .map(format_clip_time)
            .unwrap_or_default()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Drain the outbox against `store`, requeueing transient failures
    pub async fn flush(&mut self, store: &dyn AssetStore) -> FlushReport {
        let patches = self.outbox.drain();
        let report = persist_patches(store, patches).await;
        for patch in &report.retry {
            self.outbox.requeue(patch.clone());
        }
        report
    }

    /// Forget everything about a media item (removed or replaced)
    pub fn forget(&mut self, media_id: &str) {
        self.buffers.retain(|(id, _), _| id != media_id);
        self.last_good.remove(media_id);
        self.outbox.discard(media_id);
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
        self.last_good.clear();
        self.outbox.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AssetKind, AssetMetadata, MemoryAssetStore};
    use crate::domain::{MediaKind, PageId};

    fn video() -> MediaAttachment {
        let mut media = MediaAttachment::new(MediaKind::ExternalVideo)
            .with_source_url("https://www.youtube.com/watch?v=testId");
        media.id = "yt-1".to_string();
        media
    }

    #[test]
    fn test_input_does_not_touch_committed_value() {
        let mut editor = ClipTimingEditor::default();
        let mut media = video();
        media.clip_start = Some(30);

        editor.on_input("yt-1", ClipField::Start, "1:");
        assert_eq!(editor.state("yt-1", ClipField::Start), EditState::Editing);
        assert_eq!(media.clip_start, Some(30));
        assert_eq!(editor.display_value(&media, ClipField::Start), "1:");
    }

    #[test]
    fn test_blur_commits_and_queues_patch() {
        let mut editor = ClipTimingEditor::default();
        let mut media = video().with_storage_ref(AssetRef::from("youtube-0"));
        let now = Instant::now();

        editor.on_input("yt-1", ClipField::Start, "0:45");
        let clip = editor.on_blur("yt-1", ClipField::Start, &mut media, now).unwrap();

        assert_eq!(clip, ClipTiming { start: Some(45), end: None });
        assert_eq!(media.clip_start, Some(45));
        assert_eq!(editor.state("yt-1", ClipField::Start), EditState::Committing);
        assert_eq!(editor.outbox().len(), 1);
        assert_eq!(
            editor.outbox().pending()[0].embed_url.as_deref(),
            Some("https://www.youtube.com/embed/testId?start=45")
        );
    }

    #[test]
    fn test_parse_failure_keeps_buffer() {
        let mut editor = ClipTimingEditor::default();
        let mut media = video().with_storage_ref(AssetRef::from("youtube-0"));
        media.clip_start = Some(10);

        editor.on_input("yt-1", ClipField::Start, "1:7x");
        let err = editor
            .on_blur("yt-1", ClipField::Start, &mut media, Instant::now())
            .unwrap_err();

        assert!(matches!(err, ClipEditError::Time(ClipTimeError::Malformed(_))));
        assert_eq!(editor.buffer("yt-1", ClipField::Start), Some("1:7x"));
        assert_eq!(editor.state("yt-1", ClipField::Start), EditState::Editing);
        assert_eq!(media.clip_start, Some(10));
        assert!(editor.outbox().is_empty());
    }

    #[test]
    fn test_inverted_range_is_not_committed() {
        let mut editor = ClipTimingEditor::default();
        let mut media = video();
        let now = Instant::now();

        editor.on_input("yt-1", ClipField::Start, "60");
        editor.on_blur("yt-1", ClipField::Start, &mut media, now).unwrap();

        editor.on_input("yt-1", ClipField::End, "30");
        let err = editor.on_blur("yt-1", ClipField::End, &mut media, now).unwrap_err();

        assert_eq!(
            err,
            ClipEditError::Time(ClipTimeError::InvertedRange { start: 60, end: 30 })
        );
        assert_eq!(media.clip(), ClipTiming { start: Some(60), end: None });
        assert_eq!(editor.buffer("yt-1", ClipField::End), Some("30"));
    }

    #[test]
    fn test_other_boundary_falls_back_to_last_known_good() {
        let mut editor = ClipTimingEditor::default();
        let mut media = video();
        media.set_clip(ClipTiming { start: Some(10), end: Some(100) });
        editor.remember(&media);

        // A redraw lost the committed end, the fallback table still has it
        media.clip_end = None;
        editor.on_input("yt-1", ClipField::Start, "20");
        let clip = editor
            .on_blur("yt-1", ClipField::Start, &mut media, Instant::now())
            .unwrap();

        assert_eq!(clip, ClipTiming { start: Some(20), end: Some(100) });
    }

    #[test]
    fn test_buffer_clears_after_grace() {
        let mut editor = ClipTimingEditor::new(EditorTiming {
            clip_grace_ms: 100,
            outbox_tick_ms: 10,
        });
        let mut media = video();
        let now = Instant::now();

        editor.on_input("yt-1", ClipField::End, "90");
        editor.on_blur("yt-1", ClipField::End, &mut media, now).unwrap();

        assert_eq!(editor.tick(now + Duration::from_millis(50)), 0);
        assert_eq!(editor.display_value(&media, ClipField::End), "90");

        assert_eq!(editor.tick(now + Duration::from_millis(100)), 1);
        assert_eq!(editor.state("yt-1", ClipField::End), EditState::Idle);
        assert_eq!(editor.display_value(&media, ClipField::End), "1:30");
    }

    #[test]
    fn test_typing_again_cancels_pending_clear() {
        let mut editor = ClipTimingEditor::default();
        let mut media = video();
        let now = Instant::now();

        editor.on_input("yt-1", ClipField::Start, "5");
        editor.on_blur("yt-1", ClipField::Start, &mut media, now).unwrap();
        editor.on_input("yt-1", ClipField::Start, "7");

        assert_eq!(editor.tick(now + Duration::from_secs(10)), 0);
        assert_eq!(editor.buffer("yt-1", ClipField::Start), Some("7"));
    }

    #[test]
    fn test_display_precedence() {
        let mut editor = ClipTimingEditor::default();
        let mut media = video();
        assert_eq!(editor.display_value(&media, ClipField::Start), "");

        editor.last_good.insert("yt-1".into(), ClipTiming { start: Some(5), end: None });
        assert_eq!(editor.display_value(&media, ClipField::Start), "0:05");

        media.clip_start = Some(65);
        assert_eq!(editor.display_value(&media, ClipField::Start), "1:05");

        editor.on_input("yt-1", ClipField::Start, "2");
        assert_eq!(editor.display_value(&media, ClipField::Start), "2");
    }

    #[test]
    fn test_empty_text_clears_boundary() {
        let mut editor = ClipTimingEditor::default();
        let mut media = video();
        media.set_clip(ClipTiming { start: Some(10), end: Some(20) });

        editor.on_input("yt-1", ClipField::End, "");
        let clip = editor
            .on_blur("yt-1", ClipField::End, &mut media, Instant::now())
            .unwrap();
        assert_eq!(clip, ClipTiming { start: Some(10), end: None });
    }

    #[test]
    fn test_rejects_non_video_media() {
        let mut editor = ClipTimingEditor::default();
        let mut image = MediaAttachment::new(MediaKind::Image);
        editor.on_input(&image.id.clone(), ClipField::Start, "5");
        let id = image.id.clone();
        assert!(matches!(
            editor.on_blur(&id, ClipField::Start, &mut image, Instant::now()),
            Err(ClipEditError::NotExternalVideo(_))
        ));
    }

    #[test]
    fn test_outbox_coalesces_per_media() {
        let mut outbox = Outbox::new();
        let patch = |start| PendingPatch {
            media_id: "yt-1".into(),
            asset_ref: AssetRef::from("youtube-0"),
            clip: ClipTiming { start: Some(start), end: None },
            embed_url: None,
        };
        outbox.enqueue(patch(1));
        outbox.enqueue(patch(2));
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.pending()[0].clip.start, Some(2));

        // An older failed patch does not override the newer one
        outbox.requeue(patch(1));
        assert_eq!(outbox.pending()[0].clip.start, Some(2));
    }

    #[tokio::test]
    async fn test_flush_persists_pair() {
        let store = MemoryAssetStore::new();
        let page = PageId::from("topic-0");
        let asset_ref = store
            .store(
                Vec::new(),
                &page,
                AssetKind::Youtube,
                AssetMetadata::new(page.clone(), AssetKind::Youtube, "clip"),
            )
            .await
            .unwrap();

        let mut editor = ClipTimingEditor::default();
        let mut media = video().with_storage_ref(asset_ref.clone());
        let now = Instant::now();

        editor.on_input("yt-1", ClipField::Start, "45");
        editor.on_blur("yt-1", ClipField::Start, &mut media, now).unwrap();
        editor.on_input("yt-1", ClipField::End, "3:00");
        editor.on_blur("yt-1", ClipField::End, &mut media, now).unwrap();

        let report = editor.flush(&store).await;
        assert_eq!(report.persisted, 1);
        assert!(editor.outbox().is_empty());

        let stored = store.get(&asset_ref).await.unwrap().metadata;
        assert_eq!(stored.clip_start, Some(45));
        assert_eq!(stored.clip_end, Some(180));
        assert_eq!(
            stored.embed_url.as_deref(),
            Some("https://www.youtube.com/embed/testId?start=45&end=180")
        );
    }

    #[tokio::test]
    async fn test_flush_drops_patch_for_missing_asset() {
        let store = MemoryAssetStore::new();
        let mut editor = ClipTimingEditor::default();
        let mut media = video().with_storage_ref(AssetRef::from("youtube-9"));

        editor.on_input("yt-1", ClipField::Start, "5");
        editor.on_blur("yt-1", ClipField::Start, &mut media, Instant::now()).unwrap();

        let report = editor.flush(&store).await;
        assert_eq!(report.dropped.len(), 1);
        assert!(editor.outbox().is_empty());
    }
}
