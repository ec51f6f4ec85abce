//! File Store Integration Tests
//!
//! Stored ids stay unique across deletes and concurrent writes, so a new
//! upload never inherits another asset's payload or display handle.

mod common;

use std::sync::Arc;

use common::narrated_document;
use pagesync::adapters::{AssetStore, FileAssetStore};
use pagesync::core::{CourseSession, MediaSource};
use pagesync::domain::{MediaKind, PageId};
use tempfile::TempDir;

fn upload(name: &str, data: &[u8]) -> MediaSource {
    MediaSource::Upload {
        kind: MediaKind::Image,
        file_name: name.to_string(),
        mime_type: Some("image/png".to_string()),
        data: data.to_vec(),
    }
}

async fn file_session(temp: &TempDir) -> (CourseSession, Arc<FileAssetStore>) {
    let store = Arc::new(FileAssetStore::open(temp.path(), "4242").await.unwrap());
    (CourseSession::new(narrated_document(2), store.clone()), store)
}

#[tokio::test]
async fn test_upload_after_removal_gets_fresh_id_and_handle() {
    let temp = TempDir::new().unwrap();
    let (session, store) = file_session(&temp).await;

    let old = session
        .add_media(&PageId::from("topic-1"), upload("old.png", b"OLD IMAGE"))
        .await
        .unwrap();
    session
        .remove_media(&PageId::from("topic-1"), &old.id)
        .await
        .unwrap();
    let new = session
        .add_media(&PageId::from("topic-2"), upload("new.png", b"NEW IMAGE"))
        .await
        .unwrap();

    assert_ne!(old.storage_ref, new.storage_ref);
    assert_ne!(old.display_handle, new.display_handle);

    let stored = store.get(new.storage_ref.as_ref().unwrap()).await.unwrap();
    assert_eq!(stored.data, b"NEW IMAGE");
}

#[tokio::test]
async fn test_concurrent_uploads_on_two_pages_stay_separate() {
    let temp = TempDir::new().unwrap();
    let (session, store) = file_session(&temp).await;
    let (a, b) = (PageId::from("topic-1"), PageId::from("topic-2"));

    let (x, y) = tokio::join!(
        session.add_media(&a, upload("one.png", b"ONE")),
        session.add_media(&b, upload("two.png", b"TWO")),
    );
    let (x, y) = (x.unwrap(), y.unwrap());
    assert_ne!(x.storage_ref, y.storage_ref);

    // Replacing topic-1's media must not touch topic-2's asset
    session.add_media(&a, upload("three.png", b"THREE")).await.unwrap();

    let kept = store.get(y.storage_ref.as_ref().unwrap()).await.unwrap();
    assert_eq!(kept.data, b"TWO");
    assert_eq!(kept.metadata.page_id, b);
    assert!(store.get(x.storage_ref.as_ref().unwrap()).await.is_err());
}
