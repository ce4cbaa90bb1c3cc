//! Task: Rootfs preparation.
//!
//! Fresh boot: unpack the image layers into the container rootfs in record
//! order (later layers shadow earlier ones).
//!
//! Restart (reuse_rootfs=true): keep the existing rootfs untouched, which
//! preserves everything written under the storage prefix by previous runs.

use super::{BootCtx, log_task_error, task_start};
use crate::layers;
use crate::pipeline::PipelineTask;
use crate::store::{ImageRecord, ImageStore};
use async_trait::async_trait;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use std::path::PathBuf;

pub struct RootfsTask;

#[async_trait]
impl PipelineTask<BootCtx> for RootfsTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let container = task_start(&ctx, task_name).await;

        let (rootfs_dir, image, store, reuse_rootfs) = {
            let ctx = ctx.lock().await;
            let layout = ctx.container_layout.as_ref().ok_or_else(|| {
                BakeliteError::Internal("filesystem task must run first".into())
            })?;
            (
                layout.rootfs_dir(),
                ctx.image.clone(),
                ctx.store.clone(),
                ctx.reuse_rootfs,
            )
        };

        run_rootfs(rootfs_dir, image, store, reuse_rootfs)
            .await
            .inspect_err(|e| log_task_error(&container, task_name, e))
    }

    fn name(&self) -> &str {
        "rootfs_prepare"
    }
}

async fn run_rootfs(
    rootfs_dir: PathBuf,
    image: ImageRecord,
    store: ImageStore,
    reuse_rootfs: bool,
) -> BakeliteResult<()> {
    if reuse_rootfs {
        // The filesystem task creates the (empty) directory, so presence
        // alone proves nothing; a restartable rootfs has contents.
        let populated = std::fs::read_dir(&rootfs_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if !populated {
            return Err(BakeliteError::Storage(format!(
                "cannot restart: rootfs missing or empty at {}",
                rootfs_dir.display()
            )));
        }
        tracing::info!(
            rootfs = %rootfs_dir.display(),
            "Restart mode: reusing existing rootfs"
        );
        return Ok(());
    }

    // Verify every blob before unpacking anything.
    for layer in &image.layers {
        if !store.has_blob(&layer.digest) {
            return Err(BakeliteError::Storage(format!(
                "layer blob missing from store: {}",
                layer.digest
            )));
        }
    }

    let layer_count = image.layers.len();
    tokio::task::spawn_blocking(move || -> BakeliteResult<()> {
        for layer in &image.layers {
            layers::unpack(&store.blob_path(&layer.digest), &rootfs_dir)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| BakeliteError::Internal(format!("rootfs unpack task failed: {e}")))??;

    tracing::info!(layers = layer_count, "unpacked image rootfs");
    Ok(())
}
