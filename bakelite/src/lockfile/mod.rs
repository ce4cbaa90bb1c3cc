//! Package declaration and lock artifact.
//!
//! The lock artifact records the exact closure of third-party packages:
//! name, pinned version, source URL, and sha256 per package. Installation is
//! frozen: any inconsistency between declaration and lock fails the build
//! instead of resolving a new dependency set.

use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const LOCK_FORMAT_VERSION: u32 = 1;

/// Declared direct requirements (the `pyproject`-analog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub requires: Vec<Requirement>,
    /// Development-only group, excluded from image installs.
    #[serde(default)]
    pub dev_requires: Vec<Requirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyGroup {
    #[default]
    Main,
    Dev,
}

/// One exact pin from the lock artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub group: DependencyGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub version: u32,
    pub packages: Vec<LockedPackage>,
}

impl PackageManifest {
    pub fn load(path: &Path) -> BakeliteResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            BakeliteError::Lock(format!(
                "package declaration not found at {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            BakeliteError::Lock(format!("parsing declaration {}: {e}", path.display()))
        })
    }
}

impl LockFile {
    /// Load the lock artifact. A missing lock is fatal: frozen installs
    /// never fall back to resolving versions.
    pub fn load(path: &Path) -> BakeliteResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            BakeliteError::Lock(format!(
                "lock artifact not found at {} ({e}); a frozen install requires the lock",
                path.display()
            ))
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BakeliteError::Lock(format!("parsing lock {}: {e}", path.display())))
    }

    /// Verify the lock against the declaration and return the install set
    /// (main group only, declared order preserved).
    ///
    /// Inconsistencies are fatal: unknown lock format, duplicate entries,
    /// unpinned versions, malformed checksums, or a declared requirement the
    /// lock does not cover. Transitive packages present only in the lock are
    /// legitimate.
    pub fn verify_frozen(&self, manifest: &PackageManifest) -> BakeliteResult<Vec<&LockedPackage>> {
        if self.version != LOCK_FORMAT_VERSION {
            return Err(BakeliteError::Lock(format!(
                "unsupported lock format version {}",
                self.version
            )));
        }

        let mut seen = HashSet::new();
        for package in &self.packages {
            if !seen.insert(package.name.as_str()) {
                return Err(BakeliteError::Lock(format!(
                    "duplicate lock entry for {}",
                    package.name
                )));
            }
            if package.version.is_empty()
                || package.version.chars().any(|c| "*^~<>= ".contains(c))
            {
                return Err(BakeliteError::Lock(format!(
                    "{} is not pinned to an exact version: {:?}",
                    package.name, package.version
                )));
            }
            if package.sha256.len() != 64
                || !package.sha256.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(BakeliteError::Lock(format!(
                    "{} {} has no valid sha256",
                    package.name, package.version
                )));
            }
            if !(package.url.starts_with("https://") || package.url.starts_with("http://")) {
                return Err(BakeliteError::Lock(format!(
                    "{} {} has no fetchable source URL",
                    package.name, package.version
                )));
            }
        }

        for requirement in &manifest.requires {
            let covered = self
                .packages
                .iter()
                .any(|p| p.name == requirement.name && p.group == DependencyGroup::Main);
            if !covered {
                return Err(BakeliteError::Lock(format!(
                    "declared requirement {} is not pinned in the lock artifact",
                    requirement.name
                )));
            }
        }

        Ok(self
            .packages
            .iter()
            .filter(|p| p.group == DependencyGroup::Main)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(names: &[&str]) -> PackageManifest {
        PackageManifest {
            requires: names
                .iter()
                .map(|n| Requirement {
                    name: n.to_string(),
                })
                .collect(),
            dev_requires: vec![],
        }
    }

    fn pin(name: &str, group: DependencyGroup) -> LockedPackage {
        LockedPackage {
            name: name.into(),
            version: "1.2.3".into(),
            url: format!("https://packages.example/{name}-1.2.3.tar.gz"),
            sha256: "a".repeat(64),
            group,
        }
    }

    #[test]
    fn install_set_excludes_dev_group() {
        let lock = LockFile {
            version: 1,
            packages: vec![
                pin("fastapi", DependencyGroup::Main),
                pin("pytest", DependencyGroup::Dev),
            ],
        };
        let set = lock.verify_frozen(&manifest(&["fastapi"])).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].name, "fastapi");
    }

    #[test]
    fn undeclared_transitive_packages_are_allowed() {
        let lock = LockFile {
            version: 1,
            packages: vec![
                pin("fastapi", DependencyGroup::Main),
                pin("starlette", DependencyGroup::Main),
            ],
        };
        let set = lock.verify_frozen(&manifest(&["fastapi"])).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn missing_declared_requirement_fails() {
        let lock = LockFile {
            version: 1,
            packages: vec![pin("fastapi", DependencyGroup::Main)],
        };
        let err = lock.verify_frozen(&manifest(&["fastapi", "uvicorn"]));
        assert!(matches!(err, Err(BakeliteError::Lock(_))));
    }

    #[test]
    fn unpinned_version_fails() {
        let mut package = pin("fastapi", DependencyGroup::Main);
        package.version = "^1.2".into();
        let lock = LockFile {
            version: 1,
            packages: vec![package],
        };
        assert!(lock.verify_frozen(&manifest(&[])).is_err());
    }

    #[test]
    fn malformed_checksum_fails() {
        let mut package = pin("fastapi", DependencyGroup::Main);
        package.sha256 = "nothex".into();
        let lock = LockFile {
            version: 1,
            packages: vec![package],
        };
        assert!(lock.verify_frozen(&manifest(&[])).is_err());
    }

    #[test]
    fn duplicate_entries_fail() {
        let lock = LockFile {
            version: 1,
            packages: vec![
                pin("fastapi", DependencyGroup::Main),
                pin("fastapi", DependencyGroup::Main),
            ],
        };
        assert!(lock.verify_frozen(&manifest(&[])).is_err());
    }

    #[test]
    fn unknown_lock_format_fails() {
        let lock = LockFile {
            version: 99,
            packages: vec![],
        };
        assert!(lock.verify_frozen(&manifest(&[])).is_err());
    }

    #[test]
    fn missing_lock_file_is_fatal() {
        let err = LockFile::load(Path::new("/nonexistent/manifest.lock.json"));
        assert!(matches!(err, Err(BakeliteError::Lock(_))));
    }
}
