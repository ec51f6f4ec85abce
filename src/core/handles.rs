//! Ephemeral display handle cache.
//!
//! Maps a stored asset to a process-local handle (an object URL) that views
//! render from. Handles are shared by every mounted view, so releasing one
//! only drops a reference count; actual revocation happens in bulk on
//! session reset.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{AssetRef, DisplayHandle};

/// Errors from the allocation primitive
#[derive(Debug, Clone, Error)]
pub enum HandleError {
    #[error("Blob is empty")]
    EmptyBlob,

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),
}

/// Primitive that turns bytes into a renderable handle
pub trait HandleAllocator: Send + Sync {
    fn allocate(&self, data: &[u8], mime_type: Option<&str>) -> Result<String, HandleError>;

    fn revoke(&self, handle: &str);
}

/// Allocates `blob:` style object URLs and counts live ones
#[derive(Debug, Default)]
pub struct ObjectUrlAllocator {
    live: AtomicUsize,
}

impl ObjectUrlAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl HandleAllocator for ObjectUrlAllocator {
    fn allocate(&self, data: &[u8], _mime_type: Option<&str>) -> Result<String, HandleError> {
        if data.is_empty() {
            return Err(HandleError::EmptyBlob);
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(format!("blob:pagesync/{}", Uuid::new_v4()))
    }

    fn revoke(&self, _handle: &str) {
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

#[derive(Debug)]
struct CacheEntry {
    url: String,
    refs: usize,
}

/// Session-scoped cache of display handles keyed by storage reference
pub struct HandleCache {
    allocator: Arc<dyn HandleAllocator>,
    entries: Mutex<HashMap<AssetRef, CacheEntry>>,
}

impl Default for HandleCache {
    fn default() -> Self {
        Self::new(Arc::new(ObjectUrlAllocator::new()))
    }
}

impl HandleCache {
    pub fn new(allocator: Arc<dyn HandleAllocator>) -> Self {
        Self {
            allocator,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<AssetRef, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached handle for `key`, allocating it on first use.
    ///
    /// An empty or unusable blob yields a `Failed` handle and is not cached,
    /// so a later call can retry.
    pub fn get_or_create(&self, key: &AssetRef, blob: &[u8], mime_type: Option<&str>) -> DisplayHandle {
        let mut entries = self.entries();

        if let Some(entry) = entries.get_mut(key) {
            entry.refs += 1;
            return DisplayHandle::Ready(entry.url.clone());
        }

        if blob.is_empty() {
            warn!(%key, "Refusing to create handle for empty blob");
            return DisplayHandle::failed(HandleError::EmptyBlob.to_string());
        }

        match self.allocator.allocate(blob, mime_type) {
            Ok(url) => {
                debug!(%key, %url, "Allocated display handle");
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        url: url.clone(),
                        refs: 1,
                    },
                );
                DisplayHandle::Ready(url)
            }
            Err(e) => {
                warn!(%key, error = %e, "Display handle allocation failed");
                DisplayHandle::failed(e.to_string())
            }
        }
    }

    /// Take a reference on a cached handle, if there is one.
    /// Lets callers skip fetching the blob when it is already cached.
    pub fn acquire(&self, key: &AssetRef) -> Option<DisplayHandle> {
        self.entries().get_mut(key).map(|entry| {
            entry.refs += 1;
            DisplayHandle::Ready(entry.url.clone())
        })
    }

    /// Cached handle, without taking a reference
    pub fn get(&self, key: &AssetRef) -> Option<DisplayHandle> {
        self.entries()
            .get(key)
            .map(|e| DisplayHandle::Ready(e.url.clone()))
    }

    /// Drop one reference. The handle stays valid: a sibling view may still
    /// be displaying it.
    pub fn release(&self, key: &AssetRef) {
        if let Some(entry) = self.entries().get_mut(key) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    /// Active references held on `key`
    pub fn ref_count(&self, key: &AssetRef) -> usize {
        self.entries().get(key).map(|e| e.refs).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Session teardown: revoke every handle and empty the cache.
    /// Returns the number of handles revoked.
    pub fn reset(&self) -> usize {
        let drained: Vec<(AssetRef, CacheEntry)> = self.entries().drain().collect();
        for (_, entry) in &drained {
            self.allocator.revoke(&entry.url);
        }
        info!(revoked = drained.len(), "Display handle cache reset");
        drained.len()
    }
}

impl Drop for HandleCache {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values() {
            self.allocator.revoke(&entry.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts allocations so tests can assert one per key
    #[derive(Default)]
    struct CountingAllocator {
        allocations: AtomicUsize,
        revocations: AtomicUsize,
    }

    impl HandleAllocator for CountingAllocator {
        fn allocate(&self, _data: &[u8], _mime: Option<&str>) -> Result<String, HandleError> {
            let n = self.allocations.fetch_add(1, Ordering::SeqCst);
            Ok(format!("blob:test/{}", n))
        }

        fn revoke(&self, _handle: &str) {
            self.revocations.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingAllocator;

    impl HandleAllocator for FailingAllocator {
        fn allocate(&self, _data: &[u8], _mime: Option<&str>) -> Result<String, HandleError> {
            Err(HandleError::AllocationFailed("decoder rejected blob".into()))
        }

        fn revoke(&self, _handle: &str) {}
    }

    #[test]
    fn test_allocates_once_per_key() {
        let allocator = Arc::new(CountingAllocator::default());
        let cache = HandleCache::new(allocator.clone());
        let key = AssetRef::from("image-0");

        let first = cache.get_or_create(&key, b"data", Some("image/png"));
        let second = cache.get_or_create(&key, b"data", Some("image/png"));

        assert_eq!(first, second);
        assert_eq!(allocator.allocations.load(Ordering::SeqCst), 1);
        assert_eq!(cache.ref_count(&key), 2);
    }

    #[test]
    fn test_release_does_not_revoke() {
        let allocator = Arc::new(CountingAllocator::default());
        let cache = HandleCache::new(allocator.clone());
        let key = AssetRef::from("image-0");

        let handle = cache.get_or_create(&key, b"data", None);
        cache.release(&key);
        cache.release(&key);

        assert_eq!(cache.ref_count(&key), 0);
        assert_eq!(cache.get(&key), Some(handle));
        assert_eq!(allocator.revocations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_blob_returns_failed_handle() {
        let cache = HandleCache::default();
        let key = AssetRef::from("image-1");

        let handle = cache.get_or_create(&key, b"", None);
        assert!(!handle.is_ready());
        assert!(cache.is_empty());

        // A later call with real bytes can still succeed
        assert!(cache.get_or_create(&key, b"bytes", None).is_ready());
    }

    #[test]
    fn test_allocation_failure_is_not_cached() {
        let cache = HandleCache::new(Arc::new(FailingAllocator));
        let handle = cache.get_or_create(&AssetRef::from("video-0"), b"bytes", None);
        assert!(matches!(handle, DisplayHandle::Failed { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reset_revokes_everything() {
        let allocator = Arc::new(CountingAllocator::default());
        let cache = HandleCache::new(allocator.clone());
        cache.get_or_create(&AssetRef::from("image-0"), b"a", None);
        cache.get_or_create(&AssetRef::from("image-1"), b"b", None);

        assert_eq!(cache.reset(), 2);
        assert!(cache.is_empty());
        assert_eq!(allocator.revocations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_object_url_allocator_tracks_live_handles() {
        let allocator = Arc::new(ObjectUrlAllocator::new());
        let cache = HandleCache::new(allocator.clone());
        let handle = cache.get_or_create(&AssetRef::from("image-0"), b"a", None);
        assert!(handle.url().unwrap().starts_with("blob:pagesync/"));
        assert_eq!(allocator.live(), 1);

        drop(cache);
        assert_eq!(allocator.live(), 0);
    }
}
