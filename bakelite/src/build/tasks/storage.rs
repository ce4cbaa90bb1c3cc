//! Stage: Storage initialization.
//!
//! Ensures the persistent-storage directory set exists in the image. The
//! paths are a contract with the external application: it reads and writes
//! uploaded files under one and persists its vector-index store under the
//! other. This stage only guarantees existence; it owns no data placed there
//! afterward.

use super::{BuildCtx, log_task_error, task_start};
use crate::layers::{self, chain_key};
use crate::pipeline::PipelineTask;
use crate::store::{ImageStore, LayerRecord};
use async_trait::async_trait;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use std::path::{Path, PathBuf};

pub struct StorageInitTask;

#[async_trait]
impl PipelineTask<BuildCtx> for StorageInitTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let image = task_start(&ctx, task_name).await;

        let (paths, temp_dir, store, prev_key) = {
            let ctx = ctx.lock().await;
            (
                ctx.recipe.storage_paths(),
                ctx.layout.temp_dir(),
                ctx.store.clone(),
                ctx.cache_key.clone(),
            )
        };

        let output = tokio::task::spawn_blocking(move || {
            run_storage_init(&paths, &temp_dir, &store, &prev_key)
        })
        .await
        .map_err(|e| BakeliteError::Internal(format!("storage task failed: {e}")))?
        .inspect_err(|e| log_task_error(&image, task_name, e))?;

        let mut ctx = ctx.lock().await;
        if let Some(blob) = output.new_blob {
            ctx.guard.track(blob);
        }
        ctx.cache_key = output.layer.cache_key.clone();
        ctx.layers.push(output.layer);

        Ok(())
    }

    fn name(&self) -> &str {
        "storage_init"
    }
}

struct StorageOutput {
    layer: LayerRecord,
    new_blob: Option<PathBuf>,
}

fn run_storage_init(
    paths: &[String],
    temp_dir: &Path,
    store: &ImageStore,
    prev_key: &str,
) -> BakeliteResult<StorageOutput> {
    let mut parts: Vec<&[u8]> = vec![b"storage"];
    for path in paths {
        parts.push(path.as_bytes());
    }
    let cache_key = chain_key(prev_key, &parts);

    if let Some(layer) = store.lookup_layer(&cache_key)? {
        return Ok(StorageOutput {
            layer,
            new_blob: None,
        });
    }

    let staging = tempfile::tempdir_in(temp_dir)?;
    let root = staging.path().join("layer");
    for path in paths {
        std::fs::create_dir_all(root.join(path.trim_start_matches('/')))?;
    }

    let packed = layers::pack_dir(&root, temp_dir)?;
    let newly_installed = store.install_archive(&packed)?;
    let layer = LayerRecord {
        digest: packed.digest.clone(),
        cache_key,
        size: packed.size,
        stage: "storage".into(),
    };
    store.record_layer(&layer)?;

    tracing::info!(paths = paths.len(), "initialized storage directory layer");

    let new_blob = newly_installed.then(|| store.blob_path(&packed.digest));
    Ok(StorageOutput { layer, new_blob })
}
