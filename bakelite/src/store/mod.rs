//! Image store: content-addressed blobs plus database-backed records.
//!
//! Blobs (layer archives and image configuration documents) live under
//! `images/blobs/sha256/<digest>`. Records describe which blobs make up an
//! image and in what order the boot pipeline unpacks them.

mod base;

pub use base::{BasePuller, PulledBase};

use crate::db::{Database, ImageRecords};
use crate::layers::{LayerArchive, sha256_hex};
use crate::runtime::layout::FilesystemLayout;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One layer of an image, with the cache key that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerRecord {
    /// sha256 of the compressed blob.
    pub digest: String,
    /// Digest of the stage's declared inputs chained onto the previous
    /// stage's key. A key hit on rebuild skips the stage entirely.
    pub cache_key: String,
    pub size: u64,
    /// Producing stage ("base", "dependencies", "workspace", "storage").
    pub stage: String,
}

/// A built image: ordered layers plus the configuration blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    /// User-facing image name from the recipe.
    pub reference: String,
    pub created_at: DateTime<Utc>,
    /// Pinned base reference, `None` when built from scratch.
    pub base: Option<String>,
    /// Unpack order for boot: base layers first, then stage layers.
    pub layers: Vec<LayerRecord>,
    /// Blob digest of the serialized OCI image configuration.
    pub config_digest: String,
    /// Absolute paths inside the rootfs that must exist at process start.
    pub storage_paths: Vec<String>,
}

#[derive(Clone)]
pub struct ImageStore {
    blobs_dir: PathBuf,
    records: ImageRecords,
}

impl ImageStore {
    pub(crate) fn new(layout: &FilesystemLayout, db: Database) -> BakeliteResult<Self> {
        let blobs_dir = layout.blobs_dir();
        std::fs::create_dir_all(&blobs_dir)?;
        Ok(Self {
            blobs_dir,
            records: ImageRecords::new(db),
        })
    }

    pub fn blob_path(&self, digest: &str) -> PathBuf {
        self.blobs_dir.join(digest)
    }

    pub fn has_blob(&self, digest: &str) -> bool {
        self.blob_path(digest).exists()
    }

    /// Install a packed layer blob. Returns whether the blob was new; an
    /// already-present blob with the same digest is identical by
    /// construction, so the staged copy is discarded.
    pub fn install_archive(&self, archive: &LayerArchive) -> BakeliteResult<bool> {
        let dest = self.blob_path(&archive.digest);
        if dest.exists() {
            let _ = std::fs::remove_file(&archive.path);
            return Ok(false);
        }
        std::fs::rename(&archive.path, &dest).map_err(|e| {
            BakeliteError::Storage(format!("installing blob {}: {e}", archive.digest))
        })?;
        Ok(true)
    }

    /// Install raw bytes (base layers, config documents) as a blob.
    /// Returns `(digest, newly_installed)`.
    pub fn install_bytes(&self, bytes: &[u8]) -> BakeliteResult<(String, bool)> {
        let digest = sha256_hex(bytes);
        let dest = self.blob_path(&digest);
        if dest.exists() {
            return Ok((digest, false));
        }
        let staging = tempfile::NamedTempFile::new_in(&self.blobs_dir)?;
        std::fs::write(staging.path(), bytes)?;
        staging
            .persist(&dest)
            .map_err(|e| BakeliteError::Storage(format!("installing blob {digest}: {e}")))?;
        Ok((digest, true))
    }

    pub fn read_blob(&self, digest: &str) -> BakeliteResult<Vec<u8>> {
        std::fs::read(self.blob_path(digest))
            .map_err(|e| BakeliteError::Storage(format!("reading blob {digest}: {e}")))
    }

    /// Load an image's OCI configuration document.
    pub fn load_config(
        &self,
        record: &ImageRecord,
    ) -> BakeliteResult<oci_spec::image::ImageConfiguration> {
        let bytes = self.read_blob(&record.config_digest)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BakeliteError::Image(format!("decoding image config: {e}")))
    }

    // Record operations delegate to the database.

    pub fn save_record(&self, record: &ImageRecord) -> BakeliteResult<()> {
        self.records.save(record)
    }

    pub fn get_record(&self, reference: &str) -> BakeliteResult<Option<ImageRecord>> {
        self.records.get(reference)
    }

    pub fn list_records(&self) -> BakeliteResult<Vec<ImageRecord>> {
        self.records.list()
    }

    pub fn remove_record(&self, reference: &str) -> BakeliteResult<()> {
        self.records.remove(reference)
    }

    /// Index a freshly built layer under its cache key.
    pub fn record_layer(&self, layer: &LayerRecord) -> BakeliteResult<()> {
        self.records.record_layer(layer)
    }

    /// Cache-key lookup for skip-on-rebuild. Only returns a hit when the
    /// blob is actually present on disk.
    pub fn lookup_layer(&self, cache_key: &str) -> BakeliteResult<Option<LayerRecord>> {
        match self.records.lookup_layer(cache_key)? {
            Some(layer) if self.has_blob(&layer.digest) => Ok(Some(layer)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> ImageStore {
        let layout = FilesystemLayout::new(temp.path().to_path_buf());
        layout.prepare().unwrap();
        let db = Database::open(&layout.db_path()).unwrap();
        ImageStore::new(&layout, db).unwrap()
    }

    #[test]
    fn install_bytes_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let (digest, new) = store.install_bytes(b"blob contents").unwrap();
        assert!(new);
        let (again, new) = store.install_bytes(b"blob contents").unwrap();
        assert!(!new);
        assert_eq!(digest, again);
        assert_eq!(store.read_blob(&digest).unwrap(), b"blob contents");
    }

    #[test]
    fn lookup_layer_requires_blob_on_disk() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let (digest, _) = store.install_bytes(b"layer").unwrap();
        let layer = LayerRecord {
            digest: digest.clone(),
            cache_key: "key1".into(),
            size: 5,
            stage: "workspace".into(),
        };
        store.record_layer(&layer).unwrap();
        assert!(store.lookup_layer("key1").unwrap().is_some());

        std::fs::remove_file(store.blob_path(&digest)).unwrap();
        assert!(store.lookup_layer("key1").unwrap().is_none());
    }
}
