//! Keyed package cache and verified archive fetches.
//!
//! The cache is shared across builds and keyed by `(name, version, sha256)`.
//! Writes are idempotent (staged file + atomic rename), so concurrent builds
//! sharing a cache directory never observe a partially written archive, and
//! re-fetching the same key simply replaces identical bytes.

use crate::layers::sha256_hex;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct PackageCache {
    dir: PathBuf,
}

impl PackageCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str, version: &str, sha256: &str) -> PathBuf {
        let short = &sha256[..sha256.len().min(12)];
        self.dir.join(name).join(format!("{version}-{short}.archive"))
    }

    pub fn lookup(&self, name: &str, version: &str, sha256: &str) -> Option<PathBuf> {
        let path = self.entry_path(name, version, sha256);
        path.exists().then_some(path)
    }

    pub fn insert(
        &self,
        name: &str,
        version: &str,
        sha256: &str,
        bytes: &[u8],
    ) -> BakeliteResult<PathBuf> {
        let dest = self.entry_path(name, version, sha256);
        let parent = dest
            .parent()
            .ok_or_else(|| BakeliteError::Internal("cache entry has no parent".into()))?;
        std::fs::create_dir_all(parent)?;

        let staging = tempfile::NamedTempFile::new_in(parent)?;
        std::fs::write(staging.path(), bytes)?;
        staging
            .persist(&dest)
            .map_err(|e| BakeliteError::Storage(format!("caching {name} {version}: {e}")))?;
        Ok(dest)
    }

    /// Return the cached archive for a pin, fetching and verifying it first
    /// if absent. An unchanged lock artifact therefore rebuilds without any
    /// network traffic.
    pub async fn obtain(
        &self,
        fetcher: &ArchiveFetcher,
        name: &str,
        version: &str,
        url: &str,
        sha256: &str,
    ) -> BakeliteResult<PathBuf> {
        if let Some(path) = self.lookup(name, version, sha256) {
            tracing::debug!(package = name, version, "package cache hit");
            return Ok(path);
        }
        tracing::info!(package = name, version, url, "fetching package archive");
        let bytes = fetcher.fetch_verified(url, sha256).await?;
        self.insert(name, version, sha256, &bytes)
    }
}

/// HTTPS fetcher with mandatory checksum verification.
#[derive(Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
}

impl ArchiveFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn fetch_verified(&self, url: &str, expected_sha256: &str) -> BakeliteResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BakeliteError::Fetch(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(BakeliteError::Fetch(format!(
                "GET {url}: status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BakeliteError::Fetch(format!("reading body of {url}: {e}")))?;

        let actual = sha256_hex(&bytes);
        if actual != expected_sha256 {
            return Err(BakeliteError::Fetch(format!(
                "checksum mismatch for {url}: expected {expected_sha256}, got {actual}"
            )));
        }
        Ok(bytes.to_vec())
    }
}

impl Default for ArchiveFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn insert_then_lookup() {
        let temp = TempDir::new().unwrap();
        let cache = PackageCache::new(temp.path().join("packages"));
        let sha = "ab".repeat(32);

        assert!(cache.lookup("fastapi", "0.115.0", &sha).is_none());
        let path = cache.insert("fastapi", "0.115.0", &sha, b"archive").unwrap();
        assert_eq!(cache.lookup("fastapi", "0.115.0", &sha), Some(path.clone()));
        assert_eq!(std::fs::read(path).unwrap(), b"archive");
    }

    #[test]
    fn insert_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let cache = PackageCache::new(temp.path().join("packages"));
        let sha = "cd".repeat(32);

        let first = cache.insert("uvicorn", "0.30.0", &sha, b"bytes").unwrap();
        let second = cache.insert("uvicorn", "0.30.0", &sha, b"bytes").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(second).unwrap(), b"bytes");
    }

    #[test]
    fn different_checksums_get_distinct_entries() {
        let temp = TempDir::new().unwrap();
        let cache = PackageCache::new(temp.path().join("packages"));

        let a = cache.insert("pkg", "1.0", &"aa".repeat(32), b"one").unwrap();
        let b = cache.insert("pkg", "1.0", &"bb".repeat(32), b"two").unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn obtain_prefers_cache() {
        let temp = TempDir::new().unwrap();
        let cache = PackageCache::new(temp.path().join("packages"));
        let sha = sha256_hex(b"cached bytes");
        cache.insert("pkg", "1.0", &sha, b"cached bytes").unwrap();

        // URL is unreachable; a cache hit must not touch the network.
        let fetcher = ArchiveFetcher::new();
        let path = cache
            .obtain(&fetcher, "pkg", "1.0", "http://127.0.0.1:1/pkg.tar.gz", &sha)
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"cached bytes");
    }
}
