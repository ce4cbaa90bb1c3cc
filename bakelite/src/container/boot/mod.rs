//! Container boot orchestration.
//!
//! ## Architecture
//!
//! Boot is table-driven with an execution plan selected by container status:
//!
//! ```text
//! Created (fresh boot):
//!   1. Filesystem      (create container directory layout)
//!   2. Rootfs          (unpack image layers)
//!   3. Storage         (guarantee storage directories exist)
//!   4. Spawn           (launch the foreground process)
//!
//! Stopped (restart):
//!   1. Filesystem      (load existing layout)
//!   2. Rootfs          (reuse existing rootfs - preserves storage contents)
//!   3. Storage         (guarantee storage directories exist)
//!   4. Spawn           (launch a NEW foreground process)
//! ```
//!
//! `BootCleanupGuard` provides RAII cleanup on fresh-boot failure; restarts
//! never delete an existing rootfs.

mod tasks;
mod types;

use crate::container::config::ContainerConfig;
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineBuilder, PipelineExecutor};
use crate::runtime::layout::FilesystemLayout;
use crate::runtime::types::ContainerStatus;
use crate::store::{ImageRecord, ImageStore};
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use std::sync::Arc;
use tokio::sync::Mutex;

use tasks::{FilesystemTask, RootfsTask, SpawnTask, StorageEnsureTask};
use types::{BootCtx, BootPipelineContext};

/// Get execution plan based on container status.
fn get_execution_plan(status: ContainerStatus) -> BakeliteResult<ExecutionPlan<BootCtx>> {
    let tasks: Vec<BoxedTask<BootCtx>> = match status {
        ContainerStatus::Created | ContainerStatus::Stopped => vec![
            // Restart differs only inside RootfsTask (reuse_rootfs in ctx).
            Box::new(FilesystemTask),
            Box::new(RootfsTask),
            Box::new(StorageEnsureTask),
            Box::new(SpawnTask),
        ],
        other => {
            return Err(BakeliteError::InvalidState(format!(
                "cannot boot container in {other} state"
            )));
        }
    };
    Ok(ExecutionPlan::new(tasks))
}

/// The booted foreground process. The container runs for exactly as long as
/// this child does.
pub(crate) struct BootedContainer {
    pub child: tokio::process::Child,
}

/// Boots a container from its config and image record.
pub(crate) struct ContainerBooter {
    layout: FilesystemLayout,
    store: ImageStore,
    config: ContainerConfig,
    image: ImageRecord,
    status: ContainerStatus,
}

impl ContainerBooter {
    pub(crate) fn new(
        layout: FilesystemLayout,
        store: ImageStore,
        config: ContainerConfig,
        image: ImageRecord,
        status: ContainerStatus,
    ) -> Self {
        Self {
            layout,
            store,
            config,
            image,
            status,
        }
    }

    /// Execute all boot tasks with automatic cleanup on failure.
    pub(crate) async fn build(self) -> BakeliteResult<BootedContainer> {
        let plan = get_execution_plan(self.status)?;
        let reuse_rootfs = self.status == ContainerStatus::Stopped;

        let ctx = BootPipelineContext::new(
            self.config,
            self.image,
            self.store,
            self.layout,
            reuse_rootfs,
        );
        let ctx: BootCtx = Arc::new(Mutex::new(ctx));

        if reuse_rootfs {
            // Existing rootfs holds user data; never delete it on a failed
            // restart.
            ctx.lock().await.guard.disarm();
        }

        let pipeline = PipelineBuilder::from_plan(plan);
        let metrics = PipelineExecutor::execute(pipeline, Arc::clone(&ctx)).await?;

        let mut ctx = ctx.lock().await;
        let child = ctx
            .child
            .take()
            .ok_or_else(|| BakeliteError::Internal("spawn task must run first".into()))?;
        ctx.guard.disarm();

        tracing::debug!(
            duration_ms = metrics.total_duration_ms as u64,
            "boot pipeline finished"
        );

        Ok(BootedContainer { child })
    }
}
