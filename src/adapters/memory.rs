//! In-memory asset store.
//!
//! Keeps blobs in a map and answers page listings from a per-page index.
//! The index only knows assets stored through this instance or registered
//! with `prime_page`, which is what makes priming observable.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    checksum, AssetKind, AssetMetadata, AssetRef, AssetStore, AssetSummary, ListFilter,
    MetadataPatch, StoreError, StoreResult, StoredAsset,
};
use crate::domain::PageId;

#[derive(Default)]
struct Inner {
    assets: HashMap<AssetRef, StoredAsset>,
    page_index: HashMap<PageId, Vec<AssetRef>>,
    counters: HashMap<AssetKind, u64>,
    used_bytes: u64,
}

impl Inner {
    fn index(&mut self, page_id: &PageId, asset_ref: &AssetRef) {
        let refs = self.page_index.entry(page_id.clone()).or_default();
        if !refs.contains(asset_ref) {
            refs.push(asset_ref.clone());
        }
    }

    fn unindex(&mut self, asset_ref: &AssetRef) {
        for refs in self.page_index.values_mut() {
            refs.retain(|r| r != asset_ref);
        }
    }

    fn next_ref(&mut self, kind: AssetKind) -> AssetRef {
        loop {
            let counter = self.counters.entry(kind).or_insert(0);
            let candidate = AssetRef::new(format!("{}-{}", kind, counter));
            *counter += 1;
            if !self.assets.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn reserve(&mut self, quota: Option<u64>, replacing: u64, needed: u64) -> StoreResult<()> {
        if let Some(quota) = quota {
            let available = quota.saturating_sub(self.used_bytes.saturating_sub(replacing));
            if needed > available {
                return Err(StoreError::QuotaExceeded { needed, available });
            }
        }
        Ok(())
    }
}

/// Session-local asset store
#[derive(Default)]
pub struct MemoryAssetStore {
    inner: RwLock<Inner>,
    quota_bytes: Option<u64>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes beyond `quota_bytes`
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Insert an asset without indexing it for its page, as if another
    /// session had written it
    pub async fn insert_unindexed(&self, asset_ref: AssetRef, data: Vec<u8>, metadata: AssetMetadata) {
        let mut inner = self.inner.write().await;
        inner.used_bytes += data.len() as u64;
        inner.assets.insert(
            asset_ref.clone(),
            StoredAsset {
                asset_ref,
                data,
                metadata,
            },
        );
    }

    /// Drop a blob but leave the page index pointing at it
    pub async fn drop_blob(&self, asset_ref: &AssetRef) {
        let mut inner = self.inner.write().await;
        if let Some(asset) = inner.assets.remove(asset_ref) {
            inner.used_bytes = inner.used_bytes.saturating_sub(asset.data.len() as u64);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.assets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.assets.is_empty()
    }

    pub async fn contains(&self, asset_ref: &AssetRef) -> bool {
        self.inner.read().await.assets.contains_key(asset_ref)
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(
        &self,
        blob: Vec<u8>,
        page_id: &PageId,
        kind: AssetKind,
        mut metadata: AssetMetadata,
    ) -> StoreResult<AssetRef> {
        let mut inner = self.inner.write().await;
        inner.reserve(self.quota_bytes, 0, blob.len() as u64)?;

        let asset_ref = inner.next_ref(kind);
        metadata.page_id = page_id.clone();
        metadata.kind = kind;
        metadata.checksum = Some(checksum(&blob));
        metadata.stored_at = Some(Utc::now());

        inner.used_bytes += blob.len() as u64;
        inner.index(page_id, &asset_ref);
        inner.assets.insert(
            asset_ref.clone(),
            StoredAsset {
                asset_ref: asset_ref.clone(),
                data: blob,
                metadata,
            },
        );

        debug!(%asset_ref, %page_id, "Stored asset");
        Ok(asset_ref)
    }

    async fn store_as(
        &self,
        asset_ref: &AssetRef,
        blob: Vec<u8>,
        mut metadata: AssetMetadata,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let replacing = inner
            .assets
            .get(asset_ref)
            .map(|a| a.data.len() as u64)
            .unwrap_or(0);
        inner.reserve(self.quota_bytes, replacing, blob.len() as u64)?;

        metadata.checksum = Some(checksum(&blob));
        metadata.stored_at = Some(Utc::now());

        inner.used_bytes = inner.used_bytes.saturating_sub(replacing) + blob.len() as u64;
        inner.unindex(asset_ref);
        let page_id = metadata.page_id.clone();
        inner.index(&page_id, asset_ref);
        inner.assets.insert(
            asset_ref.clone(),
            StoredAsset {
                asset_ref: asset_ref.clone(),
                data: blob,
                metadata,
            },
        );
        Ok(())
    }

    async fn get(&self, asset_ref: &AssetRef) -> StoreResult<StoredAsset> {
        self.inner
            .read()
            .await
            .assets
            .get(asset_ref)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(asset_ref.clone()))
    }

    async fn delete(&self, asset_ref: &AssetRef) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(asset) = inner.assets.remove(asset_ref) {
            inner.used_bytes = inner.used_bytes.saturating_sub(asset.data.len() as u64);
        }
        inner.unindex(asset_ref);
        Ok(())
    }

    async fn list_valid_for_page(
        &self,
        page_id: &PageId,
        filter: &ListFilter,
    ) -> StoreResult<Vec<AssetSummary>> {
        let inner = self.inner.read().await;
        let Some(refs) = inner.page_index.get(page_id) else {
            return Ok(Vec::new());
        };

        let mut summaries = Vec::new();
        for asset_ref in refs {
            match inner.assets.get(asset_ref) {
                Some(asset) if filter.accepts(asset.metadata.kind) => {
                    summaries.push(AssetSummary {
                        asset_ref: asset_ref.clone(),
                        kind: asset.metadata.kind,
                        metadata: asset.metadata.clone(),
                        size_bytes: asset.data.len() as u64,
                    });
                }
                Some(_) => {}
                // Metadata lives with the blob, so a dangling entry is always skipped
                None => {
                    debug!(%asset_ref, "Indexed asset has no blob, skipping");
                }
            }
        }
        Ok(summaries)
    }

    async fn update_metadata(&self, asset_ref: &AssetRef, patch: MetadataPatch) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let asset = inner
            .assets
            .get_mut(asset_ref)
            .ok_or_else(|| StoreError::NotFound(asset_ref.clone()))?;
        asset.metadata.apply(&patch);
        Ok(())
    }

    async fn prime_page(&self, page_id: &PageId, refs: &[AssetRef]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        for asset_ref in refs {
            if inner.assets.contains_key(asset_ref) {
                inner.index(page_id, asset_ref);
            }
        }
        Ok(())
    }
}
