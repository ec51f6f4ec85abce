//! Asset store gateway.
//!
//! The persistent asset store is an external collaborator reached only
//! through async calls. [`AssetStore`] is the contract the sync engine
//! consumes; `memory` and `file_store` provide two implementations.

pub mod file_store;
pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::{AssetRef, BlockNumber, MediaKind, NarrationKind, PageId};

pub use file_store::FileAssetStore;
pub use memory::MemoryAssetStore;

/// Errors surfaced by an asset store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Asset not found: {0}")]
    NotFound(AssetRef),

    #[error("Storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Asset store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Asset store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Quota and availability failures may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::QuotaExceeded { .. } | StoreError::Unavailable(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Kind of a stored asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Video,
    #[serde(alias = "external_video")]
    Youtube,
    Audio,
    Caption,
}

impl AssetKind {
    /// Kinds that render on the page (everything but narration)
    pub const VISUAL: [AssetKind; 3] = [AssetKind::Image, AssetKind::Video, AssetKind::Youtube];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Video => "video",
            AssetKind::Youtube => "youtube",
            AssetKind::Audio => "audio",
            AssetKind::Caption => "caption",
        }
    }

    /// The visual media kind, if this is one
    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            AssetKind::Image => Some(MediaKind::Image),
            AssetKind::Video => Some(MediaKind::Video),
            AssetKind::Youtube => Some(MediaKind::ExternalVideo),
            AssetKind::Audio | AssetKind::Caption => None,
        }
    }
}

impl From<MediaKind> for AssetKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => AssetKind::Image,
            MediaKind::Video => AssetKind::Video,
            MediaKind::ExternalVideo => AssetKind::Youtube,
        }
    }
}

impl From<NarrationKind> for AssetKind {
    fn from(kind: NarrationKind) -> Self {
        match kind {
            NarrationKind::Audio => AssetKind::Audio,
            NarrationKind::Caption => AssetKind::Caption,
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sidecar metadata persisted next to each blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub page_id: PageId,

    #[serde(rename = "type")]
    pub kind: AssetKind,

    #[serde(default)]
    pub original_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Origin of the asset; a URL for external video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_start: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_end: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<BlockNumber>,

    /// First 16 hex chars of the payload's SHA-256
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<DateTime<Utc>>,

    /// Fields written by other producers, kept verbatim
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AssetMetadata {
    pub fn new(page_id: PageId, kind: AssetKind, original_name: impl Into<String>) -> Self {
        Self {
            page_id,
            kind,
            original_name: original_name.into(),
            mime_type: None,
            source: None,
            embed_url: None,
            title: None,
            clip_start: None,
            clip_end: None,
            block_number: None,
            checksum: None,
            stored_at: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_block_number(mut self, block: BlockNumber) -> Self {
        self.block_number = Some(block);
        self
    }

    /// Apply a partial update
    pub fn apply(&mut self, patch: &MetadataPatch) {
        if let Some(clip_start) = patch.clip_start {
            self.clip_start = clip_start;
        }
        if let Some(clip_end) = patch.clip_end {
            self.clip_end = clip_end;
        }
        if let Some(ref embed_url) = patch.embed_url {
            self.embed_url = embed_url.clone();
        }
        if let Some(ref title) = patch.title {
            self.title = Some(title.clone());
        }
    }

    /// Look up a string from the open `extra` map
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Partial metadata update. `Some(None)` clears a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub clip_start: Option<Option<u32>>,
    pub clip_end: Option<Option<u32>>,
    pub embed_url: Option<Option<String>>,
    pub title: Option<String>,
}

/// Blob plus metadata returned by `get`
#[derive(Debug, Clone)]
pub struct StoredAsset {
    pub asset_ref: AssetRef,
    pub data: Vec<u8>,
    pub metadata: AssetMetadata,
}

/// Listing entry returned by `list_valid_for_page`
#[derive(Debug, Clone, PartialEq)]
pub struct AssetSummary {
    pub asset_ref: AssetRef,
    pub kind: AssetKind,
    pub metadata: AssetMetadata,
    pub size_bytes: u64,
}

/// Filter for `list_valid_for_page`
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Empty means every kind
    pub kinds: HashSet<AssetKind>,

    /// Skip entries whose blob no longer exists
    pub verify_existence: bool,
}

impl ListFilter {
    pub fn kinds(kinds: impl IntoIterator<Item = AssetKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            verify_existence: false,
        }
    }

    /// Image, video and external video only
    pub fn visual() -> Self {
        Self::kinds(AssetKind::VISUAL)
    }

    pub fn verified(mut self) -> Self {
        self.verify_existence = true;
        self
    }

    pub fn accepts(&self, kind: AssetKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Asynchronous key/value + blob store
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Human-readable store name
    fn name(&self) -> &str;

    /// Persist a blob for a page and return its reference
    async fn store(
        &self,
        blob: Vec<u8>,
        page_id: &PageId,
        kind: AssetKind,
        metadata: AssetMetadata,
    ) -> StoreResult<AssetRef>;

    /// Persist a blob under a caller-chosen reference, replacing any
    /// previous asset with that reference
    async fn store_as(
        &self,
        asset_ref: &AssetRef,
        blob: Vec<u8>,
        metadata: AssetMetadata,
    ) -> StoreResult<()>;

    async fn get(&self, asset_ref: &AssetRef) -> StoreResult<StoredAsset>;

    async fn delete(&self, asset_ref: &AssetRef) -> StoreResult<()>;

    /// Assets currently valid for a page, in store order
    async fn list_valid_for_page(
        &self,
        page_id: &PageId,
        filter: &ListFilter,
    ) -> StoreResult<Vec<AssetSummary>>;

    async fn update_metadata(&self, asset_ref: &AssetRef, patch: MetadataPatch) -> StoreResult<()>;

    /// Register references the document already lists for a page, so assets
    /// written by another session become discoverable
    async fn prime_page(&self, _page_id: &PageId, _refs: &[AssetRef]) -> StoreResult<()> {
        Ok(())
    }
}

/// Payload checksum (first 16 hex chars of SHA-256)
pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
