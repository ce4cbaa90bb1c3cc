//! Task: Container filesystem setup.

use super::{BootCtx, log_task_error, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use bakelite_shared::errors::BakeliteResult;

pub struct FilesystemTask;

#[async_trait]
impl PipelineTask<BootCtx> for FilesystemTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let container = task_start(&ctx, task_name).await;

        let mut ctx = ctx.lock().await;
        let layout = ctx.layout.container_layout(ctx.config.id.as_str());
        layout
            .prepare()
            .inspect_err(|e| log_task_error(&container, task_name, e))?;

        ctx.guard.set_layout(layout.clone());
        ctx.container_layout = Some(layout);

        Ok(())
    }

    fn name(&self) -> &str {
        "filesystem_setup"
    }
}
