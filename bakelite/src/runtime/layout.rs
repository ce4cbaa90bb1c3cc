//! Filesystem layout for the engine home and per-container directories.
//!
//! ```text
//! $BAKELITE_HOME/
//!   bakelite.db          engine database
//!   bakelite.lock        single-writer runtime lock
//!   images/blobs/sha256/ content-addressed layer and config blobs
//!   cache/packages/      keyed dependency cache, shared across builds
//!   containers/<id>/     per-container rootfs
//!   logs/                engine log files
//!   tmp/                 build staging, same filesystem as the blob store
//! ```

use bakelite_shared::errors::BakeliteResult;
use std::path::{Path, PathBuf};

/// Immutable engine home layout. All directory creation is idempotent.
#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn images_dir(&self) -> PathBuf {
        self.home_dir.join("images")
    }

    /// Content-addressed blob directory (`<digest>` files, sha256 hex names).
    pub fn blobs_dir(&self) -> PathBuf {
        self.images_dir().join("blobs").join("sha256")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home_dir.join("cache")
    }

    /// Keyed package cache shared across builds.
    pub fn packages_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("packages")
    }

    pub fn containers_dir(&self) -> PathBuf {
        self.home_dir.join("containers")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }

    /// Staging area for builds. Lives under the home so blob installation is
    /// a same-filesystem rename.
    pub fn temp_dir(&self) -> PathBuf {
        self.home_dir.join("tmp")
    }

    pub fn db_path(&self) -> PathBuf {
        self.home_dir.join("bakelite.db")
    }

    /// Create the directory tree. Safe to call on an existing home.
    pub fn prepare(&self) -> BakeliteResult<()> {
        for dir in [
            self.blobs_dir(),
            self.packages_cache_dir(),
            self.containers_dir(),
            self.logs_dir(),
            self.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn container_layout(&self, id: &str) -> ContainerLayout {
        ContainerLayout {
            root: self.containers_dir().join(id),
        }
    }
}

/// Per-container directory layout.
#[derive(Debug, Clone)]
pub struct ContainerLayout {
    root: PathBuf,
}

impl ContainerLayout {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unpacked image rootfs. Preserved across restarts so everything under
    /// the storage prefix survives process exits.
    pub fn rootfs_dir(&self) -> PathBuf {
        self.root.join("rootfs")
    }

    pub fn prepare(&self) -> BakeliteResult<()> {
        std::fs::create_dir_all(self.rootfs_dir())?;
        Ok(())
    }

    pub fn cleanup(&self) -> BakeliteResult<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn prepare_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let layout = FilesystemLayout::new(temp.path().join("home"));

        layout.prepare().unwrap();
        layout.prepare().unwrap();

        assert!(layout.blobs_dir().is_dir());
        assert!(layout.packages_cache_dir().is_dir());
        assert!(layout.containers_dir().is_dir());
    }

    #[test]
    fn container_cleanup_removes_tree() {
        let temp = TempDir::new().unwrap();
        let layout = FilesystemLayout::new(temp.path().to_path_buf());
        layout.prepare().unwrap();

        let container = layout.container_layout("01abc");
        container.prepare().unwrap();
        std::fs::write(container.rootfs_dir().join("file"), b"x").unwrap();

        container.cleanup().unwrap();
        assert!(!container.root().exists());
        // second cleanup is a no-op
        container.cleanup().unwrap();
    }
}
