//! Boot tasks.
//!
//! Each task does ONE thing and communicates through the shared boot
//! context:
//!
//! ```text
//! Filesystem → Rootfs → Storage → Spawn
//! ```

pub mod filesystem;
pub mod rootfs;
pub mod spawn;
pub mod storage;

pub use filesystem::FilesystemTask;
pub use rootfs::RootfsTask;
pub use spawn::SpawnTask;
pub use storage::StorageEnsureTask;

pub(crate) use super::types::BootCtx;

use bakelite_shared::errors::BakeliteError;

/// Log task entry and return the container id for later log lines.
pub(super) async fn task_start(ctx: &BootCtx, task: &str) -> String {
    let ctx = ctx.lock().await;
    let id = ctx.config.id.short().to_string();
    tracing::debug!(container = %id, task, "Boot task starting");
    id
}

pub(super) fn log_task_error(container: &str, task: &str, err: &BakeliteError) {
    tracing::error!(container, task, error = %err, "Boot task failed");
}
