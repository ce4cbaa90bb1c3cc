//! Type definitions for the build pipeline.

use crate::cache::{ArchiveFetcher, PackageCache};
use crate::recipe::ImageRecipe;
use crate::runtime::layout::FilesystemLayout;
use crate::store::{ImageRecord, ImageStore, LayerRecord};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Seed for the rolling cache key. Bumping it invalidates every stored
/// layer.
pub const CACHE_KEY_SEED: &str = "bakelite/v1";

pub type BuildCtx = Arc<Mutex<BuildPipelineContext>>;

/// Shared build pipeline context.
///
/// The explicit, versioned build-state object every stage operates over:
/// context path, environment mapping, resolved dependency set, storage path
/// list, and the accumulated layers.
pub struct BuildPipelineContext {
    pub recipe: ImageRecipe,
    pub context_dir: PathBuf,
    pub layout: FilesystemLayout,
    pub store: ImageStore,
    pub cache: PackageCache,
    pub fetcher: ArchiveFetcher,
    pub guard: BlobCleanupGuard,

    /// Rolling cache key. Each stage chains its declared inputs onto the
    /// previous stage's key, so a change in any earlier stage invalidates
    /// every later layer.
    pub cache_key: String,
    /// Environment invariants established by the base stage.
    pub env: BTreeMap<String, String>,
    pub base: Option<BaseOutput>,
    pub resolved: Option<ResolvedDependencies>,
    /// Accumulated layers in unpack order (base layers first).
    pub layers: Vec<LayerRecord>,
    /// Final image record, set by the launch stage.
    pub record: Option<ImageRecord>,
}

impl BuildPipelineContext {
    pub fn new(
        recipe: ImageRecipe,
        context_dir: PathBuf,
        layout: FilesystemLayout,
        store: ImageStore,
        cache: PackageCache,
    ) -> Self {
        Self {
            recipe,
            context_dir,
            layout,
            store,
            cache,
            fetcher: ArchiveFetcher::new(),
            guard: BlobCleanupGuard::new(),
            cache_key: CACHE_KEY_SEED.to_string(),
            env: BTreeMap::new(),
            base: None,
            resolved: None,
            layers: Vec::new(),
            record: None,
        }
    }
}

/// Output from the base provisioning stage.
#[derive(Debug, Clone)]
pub struct BaseOutput {
    /// Pinned base reference, `None` for scratch builds.
    pub reference: Option<String>,
    /// Registry-reported manifest digest, when available.
    pub digest: Option<String>,
}

/// Resolved dependency set, recorded for listings and logs.
#[derive(Debug, Clone)]
pub struct ResolvedDependencies {
    /// `(name, version)` pairs of the installed main-group packages.
    pub packages: Vec<(String, String)>,
    /// `(name, version)` pairs of the installed toolchain bundles.
    pub toolchain: Vec<(String, String)>,
}

/// RAII guard discarding this build's freshly installed blobs on failure.
///
/// Blobs that pre-existed (cache hits, shared base layers) are never
/// tracked, so a failed build only removes what it added. With the image
/// record written after every stage succeeds, no partial image is ever
/// published.
pub struct BlobCleanupGuard {
    blobs: Vec<PathBuf>,
    armed: bool,
}

impl BlobCleanupGuard {
    pub fn new() -> Self {
        Self {
            blobs: Vec::new(),
            armed: true,
        }
    }

    /// Track a newly installed blob for cleanup on failure.
    pub fn track(&mut self, path: PathBuf) {
        self.blobs.push(path);
    }

    /// Disarm the guard (call on success).
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Default for BlobCleanupGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BlobCleanupGuard {
    fn drop(&mut self) {
        if !self.armed || self.blobs.is_empty() {
            return;
        }

        tracing::warn!(
            blobs = self.blobs.len(),
            "Image build failed, discarding staged blobs"
        );
        for blob in &self.blobs {
            if let Err(e) = std::fs::remove_file(blob) {
                tracing::warn!(blob = %blob.display(), error = %e, "Failed to discard staged blob");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn disarmed_guard_keeps_blobs() {
        let temp = TempDir::new().unwrap();
        let blob = temp.path().join("blob");
        std::fs::write(&blob, b"x").unwrap();

        let mut guard = BlobCleanupGuard::new();
        guard.track(blob.clone());
        guard.disarm();
        drop(guard);

        assert!(blob.exists());
    }

    #[test]
    fn armed_guard_discards_tracked_blobs() {
        let temp = TempDir::new().unwrap();
        let tracked = temp.path().join("tracked");
        let untracked = temp.path().join("untracked");
        std::fs::write(&tracked, b"x").unwrap();
        std::fs::write(&untracked, b"y").unwrap();

        let mut guard = BlobCleanupGuard::new();
        guard.track(tracked.clone());
        drop(guard);

        assert!(!tracked.exists());
        assert!(untracked.exists());
    }
}
