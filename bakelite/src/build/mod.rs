//! Image build orchestration.
//!
//! ## Architecture
//!
//! The build is table-driven: one execution plan, five strictly sequential
//! stages over a shared pipeline context:
//!
//! ```text
//! 1. BaseEnv        (resolve pinned base, env invariants, workdir)
//! 2. Dependencies   (frozen install through the keyed package cache)
//! 3. Workspace      (copy source tree; never invalidates the dep layer)
//! 4. Storage        (create the persistent-storage directory set)
//! 5. Launch         (declare port + startup command, write image config)
//! ```
//!
//! Each stage chains its declared inputs onto a rolling cache key; a key hit
//! reuses the stored layer and skips the stage's work. `BlobCleanupGuard`
//! discards freshly staged blobs on failure, and the image record is only
//! written after every stage succeeds, so no partial image is ever
//! published.

mod tasks;
mod types;

pub use types::{BaseOutput, BuildPipelineContext, ResolvedDependencies};

use crate::cache::PackageCache;
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineBuilder, PipelineExecutor};
use crate::recipe::ImageRecipe;
use crate::runtime::layout::FilesystemLayout;
use crate::store::{ImageRecord, ImageStore};
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use types::BuildCtx;

use tasks::{
    BaseEnvTask, DependencyInstallTask, LaunchDeclareTask, StorageInitTask,
    WorkspaceMaterializeTask,
};

fn execution_plan() -> ExecutionPlan<BuildCtx> {
    ExecutionPlan::new(vec![
        Box::new(BaseEnvTask) as BoxedTask<BuildCtx>,
        Box::new(DependencyInstallTask),
        Box::new(WorkspaceMaterializeTask),
        Box::new(StorageInitTask),
        Box::new(LaunchDeclareTask),
    ])
}

/// Builds an image from a recipe and a build context directory.
///
/// # Example
///
/// ```ignore
/// let record = ImageBuilder::new(layout, store, cache, recipe, context_dir)?
///     .build()
///     .await?;
/// ```
pub(crate) struct ImageBuilder {
    layout: FilesystemLayout,
    store: ImageStore,
    cache: PackageCache,
    recipe: ImageRecipe,
    context_dir: PathBuf,
}

impl ImageBuilder {
    pub(crate) fn new(
        layout: FilesystemLayout,
        store: ImageStore,
        cache: PackageCache,
        recipe: ImageRecipe,
        context_dir: PathBuf,
    ) -> BakeliteResult<Self> {
        recipe.validate()?;
        Ok(Self {
            layout,
            store,
            cache,
            recipe,
            context_dir,
        })
    }

    /// Run all build stages and persist the image record.
    pub(crate) async fn build(self) -> BakeliteResult<ImageRecord> {
        let total_start = Instant::now();

        let ImageBuilder {
            layout,
            store,
            cache,
            recipe,
            context_dir,
        } = self;

        tracing::info!(
            image = %recipe.name,
            context = %context_dir.display(),
            "starting image build"
        );

        let ctx = BuildPipelineContext::new(
            recipe,
            context_dir,
            layout,
            store.clone(),
            cache,
        );
        let ctx: BuildCtx = Arc::new(Mutex::new(ctx));

        let pipeline = PipelineBuilder::from_plan(execution_plan());
        let metrics = PipelineExecutor::execute(pipeline, Arc::clone(&ctx)).await?;

        let mut ctx = ctx.lock().await;
        if let Some(resolved) = &ctx.resolved {
            tracing::debug!(
                packages = resolved.packages.len(),
                toolchain = resolved.toolchain.len(),
                "resolved dependency set"
            );
        }
        let record = ctx
            .record
            .take()
            .ok_or_else(|| BakeliteError::Internal("launch stage must run first".into()))?;

        // All stages succeeded: publish the record, then keep the blobs.
        store.save_record(&record)?;
        ctx.guard.disarm();

        metrics.log_tasks();
        tracing::info!(
            image = %record.reference,
            layers = record.layers.len(),
            duration_ms = total_start.elapsed().as_millis() as u64,
            "image build complete"
        );

        Ok(record)
    }
}
