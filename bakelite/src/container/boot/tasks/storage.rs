//! Task: Storage directory guarantee.
//!
//! Ensures the storage directory set exists inside the rootfs at the moment
//! the process starts. Idempotent: an already-provisioned path is left
//! exactly as it is, contents included.

use super::{BootCtx, log_task_error, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};

pub struct StorageEnsureTask;

#[async_trait]
impl PipelineTask<BootCtx> for StorageEnsureTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let container = task_start(&ctx, task_name).await;

        let ctx = ctx.lock().await;
        let layout = ctx
            .container_layout
            .as_ref()
            .ok_or_else(|| BakeliteError::Internal("filesystem task must run first".into()))?;
        let rootfs = layout.rootfs_dir();

        for path in &ctx.config.storage_paths {
            let dir = rootfs.join(path.trim_start_matches('/'));
            std::fs::create_dir_all(&dir)
                .map_err(|e| {
                    BakeliteError::Storage(format!(
                        "ensuring storage directory {}: {e}",
                        dir.display()
                    ))
                })
                .inspect_err(|e| log_task_error(&container, task_name, e))?;
        }

        tracing::debug!(paths = ctx.config.storage_paths.len(), "storage directories present");
        Ok(())
    }

    fn name(&self) -> &str {
        "storage_ensure"
    }
}
