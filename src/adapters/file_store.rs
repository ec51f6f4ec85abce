//! File-backed asset store.
//!
//! Layout: `<root>/<project>/media/<asset>.bin` holds the payload and
//! `<asset>.json` the sidecar metadata. Listings scan the sidecars, so
//! every asset on disk is discoverable without priming.
//!
//! Generated ids come from a per-kind high-water mark kept in
//! `<root>/<project>/asset_ids.json`, so a deleted id is never handed out
//! again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    checksum, AssetKind, AssetMetadata, AssetRef, AssetStore, AssetSummary, ListFilter,
    MetadataPatch, StoreError, StoreResult, StoredAsset,
};
use crate::domain::PageId;

/// Asset store rooted in a project media directory
pub struct FileAssetStore {
    media_dir: PathBuf,
    counters_path: PathBuf,
    /// Held across id allocation and the write that claims it
    allocation: Mutex<()>,
}

impl FileAssetStore {
    /// Open (creating if needed) the media directory for a project.
    ///
    /// `project` may be a bare id or a `Name_<digits>.scormproj` path.
    pub async fn open(root: &Path, project: &str) -> StoreResult<Self> {
        let project_id = extract_project_id(project);
        let project_dir = root.join(&project_id);
        let media_dir = project_dir.join("media");
        fs::create_dir_all(&media_dir).await?;
        info!(media_dir = %media_dir.display(), "Opened file asset store");
        Ok(Self {
            media_dir,
            counters_path: project_dir.join("asset_ids.json"),
            allocation: Mutex::new(()),
        })
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    fn blob_path(&self, asset_ref: &AssetRef) -> PathBuf {
        self.media_dir.join(format!("{}.bin", asset_ref))
    }

    fn sidecar_path(&self, asset_ref: &AssetRef) -> PathBuf {
        self.media_dir.join(format!("{}.json", asset_ref))
    }

    async fn read_metadata(&self, asset_ref: &AssetRef) -> StoreResult<AssetMetadata> {
        let path = self.sidecar_path(asset_ref);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(asset_ref.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_asset(
        &self,
        asset_ref: &AssetRef,
        blob: &[u8],
        metadata: &AssetMetadata,
    ) -> StoreResult<()> {
        fs::write(self.blob_path(asset_ref), blob).await?;
        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(self.sidecar_path(asset_ref), json).await?;
        Ok(())
    }

    /// Sidecar stems in directory order, sorted for a stable listing
    async fn asset_refs(&self) -> StoreResult<Vec<AssetRef>> {
        let mut refs = Vec::new();
        let mut entries = fs::read_dir(&self.media_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                refs.push(AssetRef::new(stem));
            }
        }
        refs.sort_by(|a, b| natural_key(a.as_str()).cmp(&natural_key(b.as_str())));
        Ok(refs)
    }

    async fn read_counters(&self) -> StoreResult<BTreeMap<String, u64>> {
        match fs::read_to_string(&self.counters_path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim the next id for `kind`. Callers hold `allocation`.
    /// The mark never drops below the highest id on disk.
    async fn next_ref(&self, kind: AssetKind) -> StoreResult<AssetRef> {
        let prefix = format!("{}-", kind);
        let on_disk = self
            .asset_refs()
            .await?
            .iter()
            .filter_map(|r| r.as_str().strip_prefix(&prefix)?.parse::<u64>().ok())
            .max()
            .map(|n| n + 1)
            .unwrap_or(0);

        let mut counters = self.read_counters().await?;
        let next = counters.get(kind.as_str()).copied().unwrap_or(0).max(on_disk);
        counters.insert(kind.as_str().to_string(), next + 1);
        fs::write(&self.counters_path, serde_json::to_string_pretty(&counters)?).await?;

        Ok(AssetRef::new(format!("{}{}", prefix, next)))
    }
}

/// Sort `image-10` after `image-9`
fn natural_key(s: &str) -> (String, u64) {
    match s.rsplit_once('-') {
        Some((prefix, n)) => match n.parse::<u64>() {
            Ok(n) => (prefix.to_string(), n),
            Err(_) => (s.to_string(), 0),
        },
        None => (s.to_string(), 0),
    }
}

/// Extract a project id from a `.scormproj` path, or return the input
pub fn extract_project_id(project: &str) -> String {
    if project.contains(".scormproj") {
        if let Some(file_name) = Path::new(project).file_name().and_then(|f| f.to_str()) {
            let stem = file_name.trim_end_matches(".scormproj");
            let candidate = stem.rsplit_once('_').map(|(_, id)| id).unwrap_or(stem);
            if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
                return candidate.to_string();
            }
        }
    }
    project.to_string()
}

#[async_trait]
impl AssetStore for FileAssetStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn store(
        &self,
        blob: Vec<u8>,
        page_id: &PageId,
        kind: AssetKind,
        mut metadata: AssetMetadata,
    ) -> StoreResult<AssetRef> {
        metadata.page_id = page_id.clone();
        metadata.kind = kind;
        metadata.checksum = Some(checksum(&blob));
        metadata.stored_at = Some(Utc::now());

        let guard = self.allocation.lock().await;
        let asset_ref = self.next_ref(kind).await?;
        self.write_asset(&asset_ref, &blob, &metadata).await?;
        drop(guard);
        debug!(%asset_ref, bytes = blob.len(), "Stored asset");
        Ok(asset_ref)
    }

    async fn store_as(
        &self,
        asset_ref: &AssetRef,
        blob: Vec<u8>,
        mut metadata: AssetMetadata,
    ) -> StoreResult<()> {
        metadata.checksum = Some(checksum(&blob));
        metadata.stored_at = Some(Utc::now());
        self.write_asset(asset_ref, &blob, &metadata).await
    }

    async fn get(&self, asset_ref: &AssetRef) -> StoreResult<StoredAsset> {
        let metadata = self.read_metadata(asset_ref).await?;
        let data = match fs::read(self.blob_path(asset_ref)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(asset_ref.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(StoredAsset {
            asset_ref: asset_ref.clone(),
            data,
            metadata,
        })
    }

    async fn delete(&self, asset_ref: &AssetRef) -> StoreResult<()> {
        for path in [self.blob_path(asset_ref), self.sidecar_path(asset_ref)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn list_valid_for_page(
        &self,
        page_id: &PageId,
        filter: &ListFilter,
    ) -> StoreResult<Vec<AssetSummary>> {
        let mut summaries = Vec::new();

        for asset_ref in self.asset_refs().await? {
            let metadata = match self.read_metadata(&asset_ref).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(%asset_ref, error = %e, "Skipping unreadable sidecar");
                    continue;
                }
            };
            if metadata.page_id != *page_id || !filter.accepts(metadata.kind) {
                continue;
            }

            let size_bytes = match fs::metadata(self.blob_path(&asset_ref)).await {
                Ok(m) => m.len(),
                Err(_) if filter.verify_existence => {
                    debug!(%asset_ref, "Sidecar without payload, skipping");
                    continue;
                }
                Err(_) => 0,
            };

            summaries.push(AssetSummary {
                kind: metadata.kind,
                asset_ref,
                metadata,
                size_bytes,
            });
        }

        Ok(summaries)
    }

    async fn update_metadata(&self, asset_ref: &AssetRef, patch: MetadataPatch) -> StoreResult<()> {
        let mut metadata = self.read_metadata(asset_ref).await?;
        metadata.apply(&patch);
        let json = serde_json::to_string_pretty(&metadata)?;
        fs::write(self.sidecar_path(asset_ref), json).await?;
        Ok(())
    }
}
