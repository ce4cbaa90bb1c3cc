//! Engine-level options.

use std::path::PathBuf;

/// Environment variable overriding the engine home directory.
pub const HOME_ENV: &str = "BAKELITE_HOME";

/// Options for constructing a [`BakeliteRuntime`](crate::runtime::BakeliteRuntime).
#[derive(Debug, Clone)]
pub struct BakeliteOptions {
    /// Engine home directory. Holds the blob store, package cache, container
    /// directories, database, logs, and the runtime lock.
    pub home_dir: PathBuf,
}

impl Default for BakeliteOptions {
    fn default() -> Self {
        let home_dir = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".bakelite")
            });
        Self { home_dir }
    }
}

impl BakeliteOptions {
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
        }
    }
}
