//! Page media loader.
//!
//! Loads the visual media of one page from the asset store, resolves a
//! display handle per item and publishes an ordered snapshot for the view.
//! Each load takes a token from a [`SequenceGate`]; when the user moves to
//! another page before a load finishes, the older load notices at its next
//! suspension point and gives up without publishing anything.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{AssetMetadata, AssetStore, AssetSummary, ListFilter, StoreError};
use crate::domain::{
    build_embed_url, canonical_youtube_url, clip_from_embed_url, AssetRef, ClipTiming,
    DisplayHandle, MediaAttachment, MediaKind, PageId,
};

use super::cancel::{LoadToken, SequenceGate, Superseded};
use super::handles::HandleCache;

/// What the view currently shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaSnapshot {
    pub page_id: Option<PageId>,
    pub items: Vec<MediaAttachment>,
    pub loading: bool,
    /// Sequence of the load that produced this snapshot
    pub sequence: u64,
}

/// Result of one `load_for_page` call
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Load completed and its items were published
    Published(Vec<MediaAttachment>),
    /// A newer load started; nothing was published
    Superseded,
    /// The store failed; an empty list was published
    Failed(String),
}

impl LoadOutcome {
    pub fn items(&self) -> &[MediaAttachment] {
        match self {
            LoadOutcome::Published(items) => items,
            LoadOutcome::Superseded | LoadOutcome::Failed(_) => &[],
        }
    }
}

#[derive(Debug)]
enum LoadError {
    Superseded(Superseded),
    Store(StoreError),
}

impl From<Superseded> for LoadError {
    fn from(e: Superseded) -> Self {
        LoadError::Superseded(e)
    }
}

impl From<StoreError> for LoadError {
    fn from(e: StoreError) -> Self {
        LoadError::Store(e)
    }
}

/// Loads and publishes page media
pub struct PageMediaLoader {
    store: Arc<dyn AssetStore>,
    handles: Arc<HandleCache>,
    gate: SequenceGate,
    snapshot: watch::Sender<MediaSnapshot>,
}

impl PageMediaLoader {
    pub fn new(store: Arc<dyn AssetStore>, handles: Arc<HandleCache>) -> Self {
        let (snapshot, _) = watch::channel(MediaSnapshot::default());
        Self {
            store,
            handles,
            gate: SequenceGate::new(),
            snapshot,
        }
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<MediaSnapshot> {
        self.snapshot.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> MediaSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Invalidate every in-flight load without starting a new one
    pub fn cancel(&self) {
        self.gate.cancel_all();
    }

    /// Load the media for `page_id`.
    ///
    /// `document_media` is the page's current media list from the document;
    /// its storage references are registered with the store first so items
    /// written by another session are found.
    #[instrument(skip(self, document_media), fields(page = %page_id))]
    pub async fn load_for_page(
        &self,
        page_id: &PageId,
        document_media: &[MediaAttachment],
    ) -> LoadOutcome {
        let token = self.gate.begin();
        debug!(sequence = token.sequence(), "Starting page media load");

        self.snapshot.send_modify(|s| {
            s.page_id = Some(page_id.clone());
            s.loading = true;
            s.sequence = token.sequence();
        });

        let mut acquired = Vec::new();
        match self
            .collect(&token, page_id, document_media, &mut acquired)
            .await
        {
            Ok(items) => {
                if self.publish(&token, page_id, items.clone()) {
                    info!(count = items.len(), "Published page media");
                    LoadOutcome::Published(items)
                } else {
                    self.release_all(&acquired);
                    LoadOutcome::Superseded
                }
            }
            Err(LoadError::Superseded(s)) => {
                debug!(sequence = s.sequence, current = s.current, "Load superseded, abandoning");
                self.release_all(&acquired);
                LoadOutcome::Superseded
            }
            Err(LoadError::Store(e)) => {
                self.release_all(&acquired);
                if !token.is_current() {
                    return LoadOutcome::Superseded;
                }
                error!(error = %e, "Failed to load page media");
                self.publish(&token, page_id, Vec::new());
                LoadOutcome::Failed(e.to_string())
            }
        }
    }

    async fn collect(
        &self,
        token: &LoadToken,
        page_id: &PageId,
        document_media: &[MediaAttachment],
        acquired: &mut Vec<AssetRef>,
    ) -> Result<Vec<MediaAttachment>, LoadError> {
        let known: Vec<AssetRef> = document_media
            .iter()
            .filter_map(|m| m.storage_ref.clone())
            .collect();
        self.store.prime_page(page_id, &known).await?;
        token.ensure_current()?;

        let summaries = self
            .store
            .list_valid_for_page(page_id, &ListFilter::visual().verified())
            .await?;
        token.ensure_current()?;

        let mut items = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let resolved = self.resolve(&summary, document_media, acquired).await;
            token.ensure_current()?;
            if let Some(item) = resolved {
                items.push(item);
            }
        }

        // Not-yet-persisted external videos live only in the document
        for media in document_media {
            if media.storage_ref.is_none() && media.is_external_video() {
                items.push(resolve_unpersisted(media));
            }
        }

        Ok(items)
    }

    async fn resolve(
        &self,
        summary: &AssetSummary,
        document_media: &[MediaAttachment],
        acquired: &mut Vec<AssetRef>,
    ) -> Option<MediaAttachment> {
        let kind = summary.kind.media_kind()?;
        let existing = document_media
            .iter()
            .find(|m| m.storage_ref.as_ref() == Some(&summary.asset_ref));

        let mut item = match existing {
            Some(m) => m.clone(),
            None => MediaAttachment {
                id: summary.asset_ref.to_string(),
                kind,
                storage_ref: Some(summary.asset_ref.clone()),
                source_url: None,
                title: summary.metadata.title.clone(),
                clip_start: None,
                clip_end: None,
                display_handle: None,
            },
        };
        item.kind = kind;

        if kind == MediaKind::ExternalVideo {
            self.resolve_external(&mut item, summary, existing).await;
        } else {
            let handle = self.resolve_blob_handle(&summary.asset_ref, &summary.metadata).await;
            if handle.is_ready() {
                acquired.push(summary.asset_ref.clone());
            }
            item.display_handle = Some(handle);
        }

        Some(item)
    }

    async fn resolve_blob_handle(&self, asset_ref: &AssetRef, metadata: &AssetMetadata) -> DisplayHandle {
        if let Some(handle) = self.handles.acquire(asset_ref) {
            return handle;
        }
        match self.store.get(asset_ref).await {
            Ok(asset) => self.handles.get_or_create(
                asset_ref,
                &asset.data,
                metadata.mime_type.as_deref(),
            ),
            Err(e) => {
                warn!(%asset_ref, error = %e, "Failed to fetch media blob");
                DisplayHandle::failed(e.to_string())
            }
        }
    }

    async fn resolve_external(
        &self,
        item: &mut MediaAttachment,
        summary: &AssetSummary,
        existing: Option<&MediaAttachment>,
    ) {
        let url = match external_url_from_metadata(&summary.metadata) {
            Some(url) => Some(url),
            // Older assets keep the URL only as the blob's text
            None => match self.store.get(&summary.asset_ref).await {
                Ok(asset) => url_from_blob(&asset.data),
                Err(e) => {
                    warn!(asset_ref = %summary.asset_ref, error = %e, "Failed to fetch external video record");
                    None
                }
            },
        };

        let Some(url) = url else {
            warn!(asset_ref = %summary.asset_ref, "No URL found for external video");
            item.display_handle = Some(DisplayHandle::failed("no video URL in metadata"));
            return;
        };

        let clip = recover_clip(&summary.metadata, existing.map(|m| m.clip()));
        item.set_clip(clip);
        item.display_handle = Some(DisplayHandle::Ready(
            build_embed_url(&url, clip).unwrap_or_else(|| url.clone()),
        ));
        item.source_url = Some(canonical_youtube_url(&url).unwrap_or(url));
    }

    /// Publish `items` if `token` is still the latest load
    fn publish(&self, token: &LoadToken, page_id: &PageId, items: Vec<MediaAttachment>) -> bool {
        if !token.is_current() {
            return false;
        }
        let previous = self.snapshot.send_replace(MediaSnapshot {
            page_id: Some(page_id.clone()),
            items,
            loading: false,
            sequence: token.sequence(),
        });
        // The view unmounts the previous items; their handles stay valid
        // Only handles this loader acquired; failed ones never took a reference
        for item in previous.items {
            let acquired = !item.is_external_video()
                && item.display_handle.as_ref().is_some_and(DisplayHandle::is_ready);
            if !acquired {
                continue;
            }
            if let Some(asset_ref) = item.storage_ref {
                self.handles.release(&asset_ref);
            }
        }
        true
    }

    fn release_all(&self, acquired: &[AssetRef]) {
        for asset_ref in acquired {
            self.handles.release(asset_ref);
        }
    }
}

fn is_http_url(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("https://") || s.starts_with("http://")
}

/// Find the provider URL, trying every place producers have stored it
pub fn external_url_from_metadata(metadata: &AssetMetadata) -> Option<String> {
    let candidates = [
        metadata.source.as_deref(),
        metadata.extra_str("url"),
        metadata.extra_str("youtubeUrl"),
        metadata.embed_url.as_deref(),
        metadata.extra_str("embedUrl"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find(|c| is_http_url(c))
        .map(|c| c.trim().to_string())
}

fn url_from_blob(data: &[u8]) -> Option<String> {
    std::str::from_utf8(data)
        .ok()
        .map(str::trim)
        .filter(|s| is_http_url(s))
        .map(str::to_string)
}

/// Clip window from metadata, else from a stored embed URL, else from the
/// document's committed value
pub fn recover_clip(metadata: &AssetMetadata, document_clip: Option<ClipTiming>) -> ClipTiming {
    let raw = if metadata.clip_start.is_some() || metadata.clip_end.is_some() {
        ClipTiming {
            start: metadata.clip_start,
            end: metadata.clip_end,
        }
    } else if let Some(embed) = metadata
        .embed_url
        .as_deref()
        .or_else(|| metadata.extra_str("embedUrl"))
        .filter(|e| e.contains("start=") || e.contains("end="))
    {
        clip_from_embed_url(embed)
    } else {
        document_clip.unwrap_or_default()
    };

    ClipTiming::new(raw.start, raw.end).unwrap_or_else(|e| {
        warn!(error = %e, "Dropping invalid stored clip end");
        ClipTiming {
            start: raw.start,
            end: None,
        }
    })
}

fn resolve_unpersisted(media: &MediaAttachment) -> MediaAttachment {
    let mut item = media.clone();
    item.display_handle = Some(match media.source_url.as_deref() {
        Some(url) => DisplayHandle::Ready(
            build_embed_url(url, media.clip()).unwrap_or_else(|| url.to_string()),
        ),
        None => DisplayHandle::failed("no video URL"),
    });
    item
}
