//! Course editing session.
//!
//! Owns the document and every session-scoped resource (handle cache,
//! loader, clip editor, narration assets) and exposes the operations an
//! authoring front end drives. Bulk operations run under the configured
//! timeouts and retry transient store failures.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{AssetKind, AssetMetadata, AssetStore, ListFilter, StoreError};
use crate::domain::{
    build_embed_url, canonical_youtube_url, AssetRef, BlockNumber, ClipField, ClipTiming,
    CourseDocument, DisplayHandle, MediaAttachment, MediaKind, NarrationAsset, NarrationAssets,
    NarrationBlock, NarrationKind, PageId,
};

use super::archive::{read_archive, ArchiveError, RejectedEntry};
use super::clip_editor::{persist_patches, ClipEditError, ClipTimingEditor, EditorTiming};
use super::handles::HandleCache;
use super::limits::{LimitViolation, SyncLimits};
use super::loader::{LoadOutcome, MediaSnapshot, PageMediaLoader};
use super::narration::{extract_blocks, match_archive_entries};
use super::patcher::{apply_narration_assets, patch_page, PagePatch};

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Limit(#[from] LimitViolation),

    #[error(transparent)]
    Clip(#[from] ClipEditError),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Media '{media_id}' not found on page {page_id}")]
    MediaNotFound { page_id: PageId, media_id: String },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Input problems shown next to the triggering control
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::Limit(_) | SyncError::Clip(_) | SyncError::InvalidMedia(_)
        )
    }

    /// Failures the user may retry as-is
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(e) => e.is_transient(),
            SyncError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Media a user adds to a page
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Image or video bytes
    Upload {
        kind: MediaKind,
        file_name: String,
        mime_type: Option<String>,
        data: Vec<u8>,
    },
    /// Provider-hosted video by URL
    ExternalVideo {
        url: String,
        title: Option<String>,
        clip: ClipTiming,
    },
}

/// One narration file stored by an import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedAsset {
    pub block_number: BlockNumber,
    pub page_id: PageId,
    pub file_name: String,
    pub storage_ref: AssetRef,
}

/// Outcome of a narration archive import
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub kind: NarrationKind,
    pub imported: Vec<ImportedAsset>,
    /// Accepted entries with no matching block
    pub unmatched: Vec<String>,
    pub rejected: Vec<RejectedEntry>,
    /// Entries whose store write failed, with the error
    pub failed: Vec<(String, String)>,
}

/// Result of one ticker pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub buffers_cleared: usize,
    pub persisted: usize,
    pub pending: usize,
}

fn mime_for(kind: NarrationKind, file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match (kind, ext.as_str()) {
        (NarrationKind::Caption, _) => "text/vtt",
        (NarrationKind::Audio, "wav") => "audio/wav",
        (NarrationKind::Audio, "m4a") => "audio/mp4",
        (NarrationKind::Audio, "ogg") => "audio/ogg",
        (NarrationKind::Audio, "aac") => "audio/aac",
        (NarrationKind::Audio, _) => "audio/mpeg",
    }
}

/// Run `fut` under a deadline
async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, SyncError>>,
) -> Result<T, SyncError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, seconds = limit.as_secs(), "Operation timed out");
            Err(SyncError::Timeout {
                operation,
                seconds: limit.as_secs(),
            })
        }
    }
}

/// One authoring session over a course document
pub struct CourseSession {
    document: RwLock<CourseDocument>,
    store: Arc<dyn AssetStore>,
    handles: Arc<HandleCache>,
    loader: PageMediaLoader,
    editor: Mutex<ClipTimingEditor>,
    narration: RwLock<NarrationAssets>,
    limits: SyncLimits,
}

impl CourseSession {
    pub fn new(document: CourseDocument, store: Arc<dyn AssetStore>) -> Self {
        let handles = Arc::new(HandleCache::default());
        Self {
            document: RwLock::new(document),
            loader: PageMediaLoader::new(Arc::clone(&store), Arc::clone(&handles)),
            store,
            handles,
            editor: Mutex::new(ClipTimingEditor::default()),
            narration: RwLock::new(NarrationAssets::new()),
            limits: SyncLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SyncLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_timing(mut self, timing: EditorTiming) -> Self {
        self.editor = Mutex::new(ClipTimingEditor::new(timing));
        self
    }

    /// Share a handle cache with other sessions or views
    pub fn with_handle_cache(mut self, handles: Arc<HandleCache>) -> Self {
        self.loader = PageMediaLoader::new(Arc::clone(&self.store), Arc::clone(&handles));
        self.handles = handles;
        self
    }

    pub fn limits(&self) -> &SyncLimits {
        &self.limits
    }

    pub fn handles(&self) -> &Arc<HandleCache> {
        &self.handles
    }

    /// The current document, for the export step
    pub async fn document(&self) -> CourseDocument {
        self.document.read().await.clone()
    }

    pub async fn narration_blocks(&self) -> Vec<NarrationBlock> {
        extract_blocks(&*self.document.read().await)
    }

    pub async fn narration_assets(&self) -> NarrationAssets {
        self.narration.read().await.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaSnapshot> {
        self.loader.subscribe()
    }

    pub fn media_snapshot(&self) -> MediaSnapshot {
        self.loader.snapshot()
    }

    /// Retry `op` on transient store errors per the retry policy
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let policy = &self.limits.retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Load and publish the media of one page
    #[instrument(skip(self), fields(page = %page_id))]
    pub async fn load_page(&self, page_id: &PageId) -> LoadOutcome {
        let media = self
            .document
            .read()
            .await
            .page(page_id)
            .map(|p| p.media.clone())
            .unwrap_or_default();

        let outcome = self.loader.load_for_page(page_id, &media).await;
        if let LoadOutcome::Published(items) = &outcome {
            let mut editor = self.editor.lock().await;
            for item in items {
                editor.remember(item);
            }
        }
        outcome
    }

    /// Attach media to a page, replacing whatever it held
    #[instrument(skip(self, source), fields(page = %page_id))]
    pub async fn add_media(
        &self,
        page_id: &PageId,
        source: MediaSource,
    ) -> Result<MediaAttachment, SyncError> {
        if self.document.read().await.locate(page_id).is_none() {
            return Err(SyncError::PageNotFound(page_id.clone()));
        }

        let limit = self.limits.upload_timeout();
        let mut attachment = bounded("Media upload", limit, self.persist_media(page_id, source)).await?;

        let previous = {
            let mut document = self.document.write().await;
            let previous = document
                .page(page_id)
                .map(|p| p.media.clone())
                .unwrap_or_default();
            *document = patch_page(&document, page_id, PagePatch::Media(Some(attachment.clone())));
            previous
        };

        self.discard_media(&previous).await;

        if attachment.is_external_video() {
            self.editor.lock().await.remember(&attachment);
        }
        attachment.display_handle = attachment
            .display_handle
            .take()
            .or_else(|| attachment.storage_ref.as_ref().and_then(|r| self.handles.get(r)));

        info!(media = %attachment.id, kind = %attachment.kind, "Attached media");
        Ok(attachment)
    }

    async fn persist_media(
        &self,
        page_id: &PageId,
        source: MediaSource,
    ) -> Result<MediaAttachment, SyncError> {
        match source {
            MediaSource::Upload {
                kind,
                file_name,
                mime_type,
                data,
            } => {
                if kind == MediaKind::ExternalVideo {
                    return Err(SyncError::InvalidMedia(
                        "external videos are added by URL".to_string(),
                    ));
                }
                self.limits.validate_upload(data.len() as u64)?;

                let asset_kind = AssetKind::from(kind);
                let mut metadata = AssetMetadata::new(page_id.clone(), asset_kind, file_name.clone())
                    .with_source("upload");
                metadata.mime_type = mime_type.clone();

                let store = self.store.as_ref();
                let (blob, meta) = (&data, &metadata);
                let asset_ref = self
                    .with_retry("store media", move || {
                        store.store(blob.clone(), page_id, asset_kind, meta.clone())
                    })
                    .await?;

                let handle = self
                    .handles
                    .get_or_create(&asset_ref, &data, mime_type.as_deref());
                let mut attachment = MediaAttachment::new(kind)
                    .with_storage_ref(asset_ref)
                    .with_title(file_name);
                attachment.display_handle = Some(handle);
                Ok(attachment)
            }
            MediaSource::ExternalVideo { url, title, clip } => {
                let canonical = canonical_youtube_url(&url)
                    .ok_or_else(|| SyncError::InvalidMedia(format!("unrecognized video URL: {}", url)))?;
                let clip = ClipTiming::new(clip.start, clip.end).map_err(ClipEditError::from)?;
                let embed_url = build_embed_url(&canonical, clip);

                let mut metadata = AssetMetadata::new(
                    page_id.clone(),
                    AssetKind::Youtube,
                    title.clone().unwrap_or_else(|| canonical.clone()),
                )
                .with_source(canonical.clone())
                .with_mime_type("text/plain");
                metadata.embed_url = embed_url.clone();
                metadata.title = title.clone();
                metadata.clip_start = clip.start;
                metadata.clip_end = clip.end;

                let store = self.store.as_ref();
                let blob = canonical.clone().into_bytes();
                let (blob, meta) = (&blob, &metadata);
                let asset_ref = self
                    .with_retry("store external video", move || {
                        store.store(blob.clone(), page_id, AssetKind::Youtube, meta.clone())
                    })
                    .await?;

                let mut attachment = MediaAttachment::new(MediaKind::ExternalVideo)
                    .with_storage_ref(asset_ref)
                    .with_source_url(canonical.clone());
                attachment.title = title;
                attachment.set_clip(clip);
                attachment.display_handle = Some(DisplayHandle::Ready(
                    embed_url.unwrap_or(canonical),
                ));
                Ok(attachment)
            }
        }
    }

    /// Best-effort cleanup of replaced or removed media
    async fn discard_media(&self, media: &[MediaAttachment]) {
        let mut editor = self.editor.lock().await;
        for item in media {
            editor.forget(&item.id);
        }
        drop(editor);

        for item in media {
            let Some(asset_ref) = &item.storage_ref else {
                continue;
            };
            if let Err(e) = self.store.delete(asset_ref).await {
                warn!(%asset_ref, error = %e, "Failed to delete replaced asset");
            }
        }
    }

    /// Remove one attachment from a page
    #[instrument(skip(self), fields(page = %page_id))]
    pub async fn remove_media(&self, page_id: &PageId, media_id: &str) -> Result<(), SyncError> {
        let removed = {
            let mut document = self.document.write().await;
            let page = document
                .page(page_id)
                .ok_or_else(|| SyncError::PageNotFound(page_id.clone()))?;
            let media = page
                .media
                .iter()
                .find(|m| m.id == media_id)
                .cloned()
                .ok_or_else(|| SyncError::MediaNotFound {
                    page_id: page_id.clone(),
                    media_id: media_id.to_string(),
                })?;
            *document = patch_page(&document, page_id, PagePatch::RemoveMedia(media_id.to_string()));
            media
        };

        self.discard_media(std::slice::from_ref(&removed)).await;
        info!(media = media_id, "Removed media");
        Ok(())
    }

    /// Drop a page's media and narration references.
    /// Narration text stays; it is page content, not an asset.
    #[instrument(skip(self), fields(page = %page_id))]
    pub async fn reset_page(&self, page_id: &PageId) -> Result<(), SyncError> {
        let page = {
            let mut document = self.document.write().await;
            let page = document
                .page(page_id)
                .cloned()
                .ok_or_else(|| SyncError::PageNotFound(page_id.clone()))?;
            *document = patch_page(&document, page_id, PagePatch::Reset);
            page
        };

        self.discard_media(&page.media).await;

        if let Some(block) = page.block_number {
            let mut narration = self.narration.write().await;
            narration.remove(NarrationKind::Audio, block);
            narration.remove(NarrationKind::Caption, block);
        }
        for asset_ref in [&page.audio_ref, &page.caption_ref].into_iter().flatten() {
            if let Err(e) = self.store.delete(asset_ref).await {
                warn!(%asset_ref, error = %e, "Failed to delete narration asset");
            }
        }

        info!("Page reset");
        Ok(())
    }

    /// Keystroke in a clip field
    pub async fn clip_input(&self, media_id: &str, field: ClipField, raw: &str) {
        self.editor.lock().await.on_input(media_id, field, raw);
    }

    /// Focus left a clip field: commit the buffered text
    #[instrument(skip(self), fields(page = %page_id))]
    pub async fn clip_blur(
        &self,
        page_id: &PageId,
        media_id: &str,
        field: ClipField,
    ) -> Result<ClipTiming, SyncError> {
        let mut document = self.document.write().await;
        let mut media = document
            .page(page_id)
            .ok_or_else(|| SyncError::PageNotFound(page_id.clone()))?
            .media
            .iter()
            .find(|m| m.id == media_id)
            .cloned()
            .ok_or_else(|| SyncError::MediaNotFound {
                page_id: page_id.clone(),
                media_id: media_id.to_string(),
            })?;

        let clip = self
            .editor
            .lock()
            .await
            .on_blur(media_id, field, &mut media, Instant::now())?;

        *document = patch_page(&document, page_id, PagePatch::UpdateMedia(media));
        Ok(clip)
    }

    /// Text to show in a clip field
    pub async fn clip_display(&self, page_id: &PageId, media_id: &str, field: ClipField) -> Option<String> {
        let document = self.document.read().await;
        let media = document.page(page_id)?.media.iter().find(|m| m.id == media_id)?.clone();
        drop(document);
        Some(self.editor.lock().await.display_value(&media, field))
    }

    /// Clear expired edit buffers and persist queued clip patches
    pub async fn tick(&self) -> TickSummary {
        let (buffers_cleared, patches) = {
            let mut editor = self.editor.lock().await;
            (editor.tick(Instant::now()), editor.outbox_mut().drain())
        };
        if buffers_cleared == 0 && patches.is_empty() {
            return TickSummary::default();
        }

        let report = persist_patches(self.store.as_ref(), patches).await;

        let mut editor = self.editor.lock().await;
        for patch in report.retry {
            editor.outbox_mut().requeue(patch);
        }
        TickSummary {
            buffers_cleared,
            persisted: report.persisted,
            pending: editor.outbox().len(),
        }
    }

    /// Drive `tick` periodically until the session is dropped
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let period = match session.upgrade() {
                Some(s) => s.editor.lock().await.timing().tick(),
                None => return,
            };
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(session) = session.upgrade() else {
                    debug!("Session dropped, stopping ticker");
                    return;
                };
                let summary = session.tick().await;
                if summary.persisted > 0 {
                    debug!(persisted = summary.persisted, pending = summary.pending, "Ticker flushed clip timing");
                }
            }
        })
    }

    /// Import an archive of narration audio or captions.
    ///
    /// Entries are matched to blocks by the block number in their names and
    /// stored under the page's positional id (`audio-2` for the first topic).
    #[instrument(skip(self, archive), fields(bytes = archive.len()))]
    pub async fn import_narration_archive(
        &self,
        archive: Vec<u8>,
        kind: NarrationKind,
    ) -> Result<ImportReport, SyncError> {
        let limit = self.limits.archive_timeout();
        bounded("Archive import", limit, self.import_inner(archive, kind)).await
    }

    async fn import_inner(&self, archive: Vec<u8>, kind: NarrationKind) -> Result<ImportReport, SyncError> {
        let limits = self.limits.clone();
        let scan = tokio::task::spawn_blocking(move || read_archive(&archive, kind, &limits))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;

        let document = self.document().await;
        let blocks = extract_blocks(&document);
        let matched = match_archive_entries(&scan.accepted, &blocks);

        let mut report = ImportReport {
            kind,
            imported: Vec::new(),
            unmatched: scan
                .accepted
                .iter()
                .filter(|e| !matched.values().any(|m| m.name == e.name))
                .map(|e| e.name.clone())
                .collect(),
            rejected: scan.rejected.clone(),
            failed: Vec::new(),
        };

        for (block_number, entry) in &matched {
            let Some(block) = blocks.iter().find(|b| b.block_number == *block_number) else {
                continue;
            };
            let Some(slot) = document.locate(&block.page_id) else {
                continue;
            };
            let storage_ref = AssetRef::new(format!("{}-{}", kind.storage_prefix(), slot.storage_index()));
            let file_name = entry.file_name().to_string();
            let metadata = AssetMetadata::new(block.page_id.clone(), kind.into(), file_name.clone())
                .with_mime_type(mime_for(kind, &file_name))
                .with_block_number(*block_number);

            let store = self.store.as_ref();
            let (target, meta) = (&storage_ref, &metadata);
            let stored = self
                .with_retry("store narration", move || {
                    store.store_as(target, entry.data.clone(), meta.clone())
                })
                .await;
            if let Err(e) = stored {
                warn!(entry = %entry.name, error = %e, "Failed to store narration asset");
                report.failed.push((entry.name.clone(), e.to_string()));
                continue;
            }

            let superseded = self.narration.write().await.insert(NarrationAsset {
                block_number: *block_number,
                kind,
                file_name: file_name.clone(),
                payload: entry.data.clone(),
                storage_ref: Some(storage_ref.clone()),
            });
            if let Some(old) = superseded {
                debug!(block = %block_number, old = %old.file_name, "Replaced narration asset");
            }

            report.imported.push(ImportedAsset {
                block_number: *block_number,
                page_id: block.page_id.clone(),
                file_name,
                storage_ref,
            });
        }

        self.sync_narration_refs(&blocks).await;

        info!(
            %kind,
            imported = report.imported.len(),
            unmatched = report.unmatched.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "Narration archive imported"
        );
        Ok(report)
    }

    async fn sync_narration_refs(&self, blocks: &[NarrationBlock]) {
        let narration = self.narration.read().await;
        let mut document = self.document.write().await;
        *document = apply_narration_assets(&document, blocks, &narration);
    }

    /// Reload narration assets already in the store.
    ///
    /// Each asset is keyed by the block number its page has now, not the
    /// one recorded at import time, so renumbering never moves audio onto
    /// another page. Assets of pages that no longer have narration are
    /// skipped. Returns how many were restored.
    #[instrument(skip(self))]
    pub async fn restore_narration(&self) -> Result<usize, SyncError> {
        let document = self.document().await;
        let blocks = extract_blocks(&document);
        let filter = ListFilter::kinds([AssetKind::Audio, AssetKind::Caption]).verified();
        let mut restored = Vec::new();

        for (_, page) in document.pages() {
            let known: Vec<AssetRef> = [&page.audio_ref, &page.caption_ref]
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            let store = self.store.as_ref();
            let (page_id, known, filter) = (&page.id, &known, &filter);
            self.with_retry("prime page", move || store.prime_page(page_id, known))
                .await?;
            let summaries = self
                .with_retry("list narration", move || store.list_valid_for_page(page_id, filter))
                .await?;
            if summaries.is_empty() {
                continue;
            }

            let Some(block_number) = blocks
                .iter()
                .find(|b| b.page_id == page.id)
                .map(|b| b.block_number)
            else {
                debug!(page = %page.id, count = summaries.len(), "Page has no narration, skipping stored assets");
                continue;
            };

            for summary in summaries {
                let kind = match summary.kind {
                    AssetKind::Audio => NarrationKind::Audio,
                    AssetKind::Caption => NarrationKind::Caption,
                    _ => continue,
                };
                if summary.metadata.page_id != page.id {
                    continue;
                }
                if let Some(stored) = summary.metadata.block_number.filter(|b| *b != block_number) {
                    debug!(
                        asset_ref = %summary.asset_ref,
                        stored = %stored,
                        current = %block_number,
                        "Narration block renumbered since import"
                    );
                }
                match self.store.get(&summary.asset_ref).await {
                    Ok(asset) => restored.push(NarrationAsset {
                        block_number,
                        kind,
                        file_name: asset.metadata.original_name,
                        payload: asset.data,
                        storage_ref: Some(summary.asset_ref),
                    }),
                    Err(e) => {
                        warn!(asset_ref = %summary.asset_ref, error = %e, "Failed to restore narration asset")
                    }
                }
            }
        }

        let count = restored.len();
        {
            let mut narration = self.narration.write().await;
            for asset in restored {
                narration.insert(asset);
            }
        }
        self.sync_narration_refs(&blocks).await;

        info!(count, "Restored narration assets");
        Ok(count)
    }

    /// End the session: abandon loads, drop edit state, revoke every handle
    pub async fn teardown(&self) -> usize {
        self.loader.cancel();
        self.editor.lock().await.clear();
        let revoked = self.handles.reset();
        info!(revoked, "Session torn down");
        revoked
    }
}
