//! Stale Load Integration Tests
//!
//! A page load that finishes after the user has moved on must never
//! overwrite the newer page's media.

use std::sync::Arc;

use async_trait::async_trait;
use pagesync::adapters::{
    AssetKind, AssetMetadata, AssetStore, AssetSummary, ListFilter, MemoryAssetStore,
    MetadataPatch, StoreError, StoreResult, StoredAsset,
};
use pagesync::core::{HandleCache, LoadOutcome, PageMediaLoader};
use pagesync::domain::{AssetRef, PageId};
use tokio::sync::Notify;

/// Which call the store holds until released
enum Gate {
    Listing(PageId),
    Fetch(AssetRef),
}

/// Holds one call until released
struct GatedStore {
    inner: MemoryAssetStore,
    gate: Gate,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(inner: MemoryAssetStore, gate: Gate) -> Self {
        Self {
            inner,
            gate,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    async fn hold(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[async_trait]
impl AssetStore for GatedStore {
    fn name(&self) -> &str {
        "gated"
    }

    async fn store(
        &self,
        blob: Vec<u8>,
        page_id: &PageId,
        kind: AssetKind,
        metadata: AssetMetadata,
    ) -> StoreResult<AssetRef> {
        self.inner.store(blob, page_id, kind, metadata).await
    }

    async fn store_as(
        &self,
        asset_ref: &AssetRef,
        blob: Vec<u8>,
        metadata: AssetMetadata,
    ) -> StoreResult<()> {
        self.inner.store_as(asset_ref, blob, metadata).await
    }

    async fn get(&self, asset_ref: &AssetRef) -> StoreResult<StoredAsset> {
        if matches!(&self.gate, Gate::Fetch(gated) if gated == asset_ref) {
            self.hold().await;
        }
        self.inner.get(asset_ref).await
    }

    async fn delete(&self, asset_ref: &AssetRef) -> StoreResult<()> {
        self.inner.delete(asset_ref).await
    }

    async fn list_valid_for_page(
        &self,
        page_id: &PageId,
        filter: &ListFilter,
    ) -> StoreResult<Vec<AssetSummary>> {
        if matches!(&self.gate, Gate::Listing(gated) if gated == page_id) {
            self.hold().await;
        }
        self.inner.list_valid_for_page(page_id, filter).await
    }

    async fn update_metadata(&self, asset_ref: &AssetRef, patch: MetadataPatch) -> StoreResult<()> {
        self.inner.update_metadata(asset_ref, patch).await
    }
}

/// Fails every listing
struct BrokenStore;

#[async_trait]
impl AssetStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    async fn store(
        &self,
        _blob: Vec<u8>,
        _page_id: &PageId,
        _kind: AssetKind,
        _metadata: AssetMetadata,
    ) -> StoreResult<AssetRef> {
        Err(StoreError::Unavailable("offline".into()))
    }

    async fn store_as(
        &self,
        _asset_ref: &AssetRef,
        _blob: Vec<u8>,
        _metadata: AssetMetadata,
    ) -> StoreResult<()> {
        Err(StoreError::Unavailable("offline".into()))
    }

    async fn get(&self, asset_ref: &AssetRef) -> StoreResult<StoredAsset> {
        Err(StoreError::NotFound(asset_ref.clone()))
    }

    async fn delete(&self, _asset_ref: &AssetRef) -> StoreResult<()> {
        Ok(())
    }

    async fn list_valid_for_page(
        &self,
        _page_id: &PageId,
        _filter: &ListFilter,
    ) -> StoreResult<Vec<AssetSummary>> {
        Err(StoreError::Unavailable("offline".into()))
    }

    async fn update_metadata(&self, _asset_ref: &AssetRef, _patch: MetadataPatch) -> StoreResult<()> {
        Err(StoreError::Unavailable("offline".into()))
    }
}

async fn seed(store: &MemoryAssetStore, page: &str, name: &str) -> AssetRef {
    let page_id = PageId::from(page);
    let metadata = AssetMetadata::new(page_id.clone(), AssetKind::Image, name)
        .with_mime_type("image/png");
    store
        .store(name.as_bytes().to_vec(), &page_id, AssetKind::Image, metadata)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_superseded_load_never_publishes() {
    let inner = MemoryAssetStore::new();
    seed(&inner, "topic-1", "a.png").await;
    let b_ref = seed(&inner, "topic-2", "b.png").await;

    let store = Arc::new(GatedStore::new(inner, Gate::Listing(PageId::from("topic-1"))));
    let handles = Arc::new(HandleCache::default());
    let loader = Arc::new(PageMediaLoader::new(store.clone(), handles.clone()));

    let slow = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.load_for_page(&PageId::from("topic-1"), &[]).await })
    };
    store.entered.notified().await;

    let fast = loader.load_for_page(&PageId::from("topic-2"), &[]).await;
    assert_eq!(fast.items().len(), 1);

    store.release.notify_one();
    let stale = slow.await.unwrap();
    assert_eq!(stale, LoadOutcome::Superseded);

    let snapshot = loader.snapshot();
    assert_eq!(snapshot.page_id, Some(PageId::from("topic-2")));
    assert!(!snapshot.loading);
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].storage_ref, Some(b_ref.clone()));

    // Only the published page holds a handle
    assert_eq!(handles.len(), 1);
    assert_eq!(handles.ref_count(&b_ref), 1);
}

#[tokio::test]
async fn test_superseded_between_items_releases_acquired_handles() {
    let inner = MemoryAssetStore::new();
    let first = seed(&inner, "topic-1", "a1.png").await;
    let second = seed(&inner, "topic-1", "a2.png").await;
    let other = seed(&inner, "topic-2", "b.png").await;

    let store = Arc::new(GatedStore::new(inner, Gate::Fetch(second.clone())));
    let handles = Arc::new(HandleCache::default());
    let loader = Arc::new(PageMediaLoader::new(store.clone(), handles.clone()));

    let slow = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.load_for_page(&PageId::from("topic-1"), &[]).await })
    };
    store.entered.notified().await;
    // The first item already holds a handle
    assert_eq!(handles.ref_count(&first), 1);

    let fast = loader.load_for_page(&PageId::from("topic-2"), &[]).await;
    assert_eq!(fast.items().len(), 1);

    store.release.notify_one();
    assert_eq!(slow.await.unwrap(), LoadOutcome::Superseded);

    let snapshot = loader.snapshot();
    assert_eq!(snapshot.page_id, Some(PageId::from("topic-2")));
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].storage_ref, Some(other.clone()));

    assert_eq!(handles.ref_count(&first), 0);
    assert_eq!(handles.ref_count(&second), 0);
    assert_eq!(handles.ref_count(&other), 1);
}

#[tokio::test]
async fn test_cancel_abandons_in_flight_load() {
    let inner = MemoryAssetStore::new();
    seed(&inner, "topic-1", "a.png").await;

    let store = Arc::new(GatedStore::new(inner, Gate::Listing(PageId::from("topic-1"))));
    let loader = Arc::new(PageMediaLoader::new(store.clone(), Arc::new(HandleCache::default())));

    let pending = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.load_for_page(&PageId::from("topic-1"), &[]).await })
    };
    store.entered.notified().await;
    loader.cancel();
    store.release.notify_one();

    assert_eq!(pending.await.unwrap(), LoadOutcome::Superseded);
    assert!(loader.snapshot().items.is_empty());
}

#[tokio::test]
async fn test_store_failure_publishes_empty_list() {
    let loader = PageMediaLoader::new(Arc::new(BrokenStore), Arc::new(HandleCache::default()));
    let mut updates = loader.subscribe();

    let outcome = loader.load_for_page(&PageId::from("topic-1"), &[]).await;

    assert!(matches!(outcome, LoadOutcome::Failed(_)));
    assert!(updates.has_changed().unwrap());
    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(snapshot.page_id, Some(PageId::from("topic-1")));
    assert!(snapshot.items.is_empty());
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn test_handles_are_reused_across_visits() {
    let store = Arc::new(MemoryAssetStore::new());
    let a_ref = seed(&store, "topic-1", "a.png").await;
    seed(&store, "topic-2", "b.png").await;
    let handles = Arc::new(HandleCache::default());
    let loader = PageMediaLoader::new(store, handles.clone());

    let first = loader.load_for_page(&PageId::from("topic-1"), &[]).await;
    loader.load_for_page(&PageId::from("topic-2"), &[]).await;
    let again = loader.load_for_page(&PageId::from("topic-1"), &[]).await;

    assert_eq!(first.items()[0].display_handle, again.items()[0].display_handle);
    assert_eq!(handles.len(), 2);
    assert_eq!(handles.ref_count(&a_ref), 1);
}
