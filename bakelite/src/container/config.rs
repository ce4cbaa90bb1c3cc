//! Immutable container configuration.

use crate::runtime::types::ContainerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Static container configuration (set once at creation, never changes).
///
/// Persisted to the database and immutable throughout the container
/// lifecycle; mutable fields live in
/// [`ContainerState`](crate::runtime::types::ContainerState).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Unique container identifier (ULID).
    pub id: ContainerId,
    /// User-defined name (optional, unique if provided).
    pub name: Option<String>,
    /// Reference of the image this container was created from.
    pub image: String,
    /// Creation timestamp (UTC).
    pub created_at: DateTime<Utc>,

    // === Launch declaration, copied from the image configuration ===
    /// Environment in `KEY=VALUE` form.
    pub env: Vec<String>,
    /// Working directory inside the rootfs.
    pub workdir: String,
    /// Foreground process argv.
    pub command: Vec<String>,
    /// Declared TCP port the process binds on all interfaces.
    pub declared_port: u16,
    /// Paths inside the rootfs that must exist before the process starts.
    pub storage_paths: Vec<String>,

    /// Container home directory under the engine layout.
    pub container_home: PathBuf,
}
