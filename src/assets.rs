use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

pub type AssetId = i64;

/// Pointer to a binary object held by the asset store, plus its write state.
///
/// The pipeline never touches the bytes directly; it asks the store to
/// read/write/delete and observes `written` and `size_bytes` on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: AssetId,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub written: bool,
    pub created: DateTime<Utc>,
}

/// Durable blob storage collaborator. Keyed by asset id; filename and content
/// type are advisory metadata for the backend.
pub trait AssetStore: Send + Sync {
    fn write(&self, asset_id: AssetId, filename: &str, content_type: &str, bytes: &[u8])
        -> Result<()>;

    fn read(&self, asset_id: AssetId) -> Result<Vec<u8>>;

    /// Idempotent: deleting an asset that was never written is not an error.
    fn delete(&self, asset_id: AssetId) -> Result<()>;

    /// Size of the stored object, or `None` if nothing has been written yet.
    /// Backs the `refresh` path after out-of-band writes.
    fn len(&self, asset_id: AssetId) -> Result<Option<u64>>;
}

/// Media normalization collaborator: turns a raw asset into its "produced"
/// counterpart (image resize, loudness normalization). Opaque beyond
/// success/failure; on success the target asset has been written to the store.
pub trait MediaNormalizer: Send + Sync {
    fn normalize(&self, source: &AssetRef, target: &AssetRef) -> Result<()>;
}

/// Filesystem-backed asset store: one file per asset id under a root
/// directory. Suitable for tests and single-host deployments.
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, asset_id: AssetId) -> PathBuf {
        self.root.join(asset_id.to_string())
    }
}

impl AssetStore for LocalAssetStore {
    fn write(
        &self,
        asset_id: AssetId,
        _filename: &str,
        _content_type: &str,
        bytes: &[u8],
    ) -> Result<()> {
        std::fs::write(self.path_for(asset_id), bytes)?;
        Ok(())
    }

    fn read(&self, asset_id: AssetId) -> Result<Vec<u8>> {
        let path = self.path_for(asset_id);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("asset {} has not been written", asset_id))
            } else {
                Error::Io(e)
            }
        })
    }

    fn delete(&self, asset_id: AssetId) -> Result<()> {
        match std::fs::remove_file(self.path_for(asset_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn len(&self, asset_id: AssetId) -> Result<Option<u64>> {
        match std::fs::metadata(self.path_for(asset_id)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
