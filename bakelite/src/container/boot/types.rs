//! Type definitions for the boot pipeline.

use crate::container::config::ContainerConfig;
use crate::runtime::layout::{ContainerLayout, FilesystemLayout};
use crate::store::{ImageRecord, ImageStore};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type BootCtx = Arc<Mutex<BootPipelineContext>>;

/// Shared boot pipeline context.
pub struct BootPipelineContext {
    pub config: ContainerConfig,
    pub image: ImageRecord,
    pub store: ImageStore,
    pub layout: FilesystemLayout,
    /// Restart mode: reuse the existing rootfs, preserving everything the
    /// previous run wrote under the storage prefix.
    pub reuse_rootfs: bool,
    pub guard: BootCleanupGuard,
    pub container_layout: Option<ContainerLayout>,
    /// Spawned foreground process, set by the spawn task.
    pub child: Option<tokio::process::Child>,
}

impl BootPipelineContext {
    pub fn new(
        config: ContainerConfig,
        image: ImageRecord,
        store: ImageStore,
        layout: FilesystemLayout,
        reuse_rootfs: bool,
    ) -> Self {
        Self {
            config,
            image,
            store,
            layout,
            reuse_rootfs,
            guard: BootCleanupGuard::new(),
            container_layout: None,
            child: None,
        }
    }
}

/// RAII guard for cleanup on boot failure.
///
/// Removes the container directory if a fresh boot fails partway. Disarmed
/// for restarts: an existing rootfs holds user data and is never deleted on
/// a failed restart.
pub struct BootCleanupGuard {
    layout: Option<ContainerLayout>,
    armed: bool,
}

impl BootCleanupGuard {
    pub fn new() -> Self {
        Self {
            layout: None,
            armed: true,
        }
    }

    pub fn set_layout(&mut self, layout: ContainerLayout) {
        self.layout = Some(layout);
    }

    /// Disarm the guard (call on success, or for restarts).
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Default for BootCleanupGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BootCleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!("Container boot failed, cleaning up");
        if let Some(layout) = &self.layout
            && let Err(e) = layout.cleanup()
        {
            tracing::warn!("Failed to clean up container directory: {}", e);
        }
    }
}
