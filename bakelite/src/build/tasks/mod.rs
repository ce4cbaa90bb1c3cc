//! Build stages.
//!
//! Each stage is a task with typed inputs and outputs. Stages do ONE thing
//! and communicate only through the shared build context.
//!
//! ## Stage order
//!
//! ```text
//! BaseEnv → Dependencies → Workspace → Storage → Launch
//! ```
//!
//! Later stages depend on the filesystem and context state left by earlier
//! ones, so the plan is strictly sequential.

pub mod base_env;
pub mod dependencies;
pub mod launch;
pub mod storage;
pub mod workspace;

pub use base_env::BaseEnvTask;
pub use dependencies::DependencyInstallTask;
pub use launch::LaunchDeclareTask;
pub use storage::StorageInitTask;
pub use workspace::WorkspaceMaterializeTask;

pub(crate) use super::types::BuildCtx;

use bakelite_shared::errors::BakeliteError;

/// Log stage entry and return the image name for later log lines.
pub(super) async fn task_start(ctx: &BuildCtx, task: &str) -> String {
    let ctx = ctx.lock().await;
    tracing::debug!(image = %ctx.recipe.name, task, "Build stage starting");
    ctx.recipe.name.clone()
}

pub(super) fn log_task_error(image: &str, task: &str, err: &BakeliteError) {
    tracing::error!(image, task, error = %err, "Build stage failed");
}
