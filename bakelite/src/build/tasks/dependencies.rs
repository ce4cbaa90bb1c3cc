//! Stage: Frozen dependency installation.
//!
//! Verifies the lock artifact against the declaration, then materializes the
//! pinned toolchain bundles and locked packages into a single layer through
//! the keyed package cache. An unchanged lock artifact is a cache-key hit
//! and reuses the stored layer without touching the network.

use super::{BuildCtx, log_task_error, task_start};
use crate::build::types::ResolvedDependencies;
use crate::cache::{ArchiveFetcher, PackageCache};
use crate::layers::{self, chain_key};
use crate::lockfile::{LockFile, PackageManifest};
use crate::recipe::DependencySpec;
use crate::pipeline::PipelineTask;
use crate::store::{ImageStore, LayerRecord};
use async_trait::async_trait;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use std::path::{Path, PathBuf};

pub struct DependencyInstallTask;

#[async_trait]
impl PipelineTask<BuildCtx> for DependencyInstallTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let image = task_start(&ctx, task_name).await;

        let input = {
            let ctx = ctx.lock().await;
            DependencyInput {
                spec: ctx.recipe.dependencies.clone(),
                context_dir: ctx.context_dir.clone(),
                temp_dir: ctx.layout.temp_dir(),
                store: ctx.store.clone(),
                cache: ctx.cache.clone(),
                fetcher: ctx.fetcher.clone(),
                prev_key: ctx.cache_key.clone(),
            }
        };

        let output = run_dependency_install(input)
            .await
            .inspect_err(|e| log_task_error(&image, task_name, e))?;

        let mut ctx = ctx.lock().await;
        if let Some(blob) = output.new_blob {
            ctx.guard.track(blob);
        }
        ctx.cache_key = output.layer.cache_key.clone();
        ctx.layers.push(output.layer);
        ctx.resolved = Some(output.resolved);

        Ok(())
    }

    fn name(&self) -> &str {
        "dependency_install"
    }
}

struct DependencyInput {
    spec: DependencySpec,
    context_dir: PathBuf,
    temp_dir: PathBuf,
    store: ImageStore,
    cache: PackageCache,
    fetcher: ArchiveFetcher,
    prev_key: String,
}

struct DependencyOutput {
    layer: LayerRecord,
    resolved: ResolvedDependencies,
    /// Blob path when this build installed a new blob (for the cleanup guard).
    new_blob: Option<PathBuf>,
}

async fn run_dependency_install(input: DependencyInput) -> BakeliteResult<DependencyOutput> {
    let declaration_path = input.context_dir.join(&input.spec.declaration);
    let lock_path = input.context_dir.join(&input.spec.lock);

    // Frozen semantics: both files must exist, and the lock must cover the
    // declaration exactly. Anything else fails here, before any fetch.
    let manifest = PackageManifest::load(&declaration_path)?;
    let lock = LockFile::load(&lock_path)?;
    let install_set = lock.verify_frozen(&manifest)?;

    let resolved = ResolvedDependencies {
        packages: install_set
            .iter()
            .map(|p| (p.name.clone(), p.version.clone()))
            .collect(),
        toolchain: input
            .spec
            .toolchain
            .iter()
            .map(|t| (t.name.clone(), t.version.clone()))
            .collect(),
    };

    // The cache key covers the raw lock bytes plus everything else that
    // shapes the layer; source edits elsewhere in the context cannot touch
    // it.
    let lock_bytes = std::fs::read(&lock_path)?;
    let toolchain_blob = serde_json::to_vec(&input.spec.toolchain)
        .map_err(|e| BakeliteError::Internal(format!("serializing toolchain pins: {e}")))?;
    let cache_key = chain_key(
        &input.prev_key,
        &[
            b"dependencies",
            &lock_bytes,
            &toolchain_blob,
            input.spec.install_root.as_bytes(),
        ],
    );

    if let Some(layer) = input.store.lookup_layer(&cache_key)? {
        tracing::info!(
            packages = resolved.packages.len(),
            "dependency layer unchanged, reusing cached layer"
        );
        return Ok(DependencyOutput {
            layer,
            resolved,
            new_blob: None,
        });
    }

    // Obtain every archive (cache first, verified fetch otherwise) before
    // any unpacking starts.
    let mut archives: Vec<(PathBuf, Option<String>)> = Vec::new();
    for pin in &input.spec.toolchain {
        let path = input
            .cache
            .obtain(&input.fetcher, &pin.name, &pin.version, &pin.url, &pin.sha256)
            .await?;
        // Toolchain bundles carry their own rooted layout (bin/, lib/, ...).
        archives.push((path, None));
    }
    for package in &install_set {
        let path = input
            .cache
            .obtain(
                &input.fetcher,
                &package.name,
                &package.version,
                &package.url,
                &package.sha256,
            )
            .await?;
        archives.push((path, Some(input.spec.install_root.clone())));
    }

    let temp_dir = input.temp_dir.clone();
    let store = input.store.clone();
    let (layer, new_blob) = tokio::task::spawn_blocking(move || {
        materialize_layer(&temp_dir, &archives, &cache_key, &store)
    })
    .await
    .map_err(|e| BakeliteError::Internal(format!("dependency install task failed: {e}")))??;

    tracing::info!(
        packages = resolved.packages.len(),
        toolchain = resolved.toolchain.len(),
        digest = %layer.digest,
        "installed dependency layer"
    );

    Ok(DependencyOutput {
        layer,
        resolved,
        new_blob,
    })
}

/// Unpack all archives into a staged root and pack it as one layer.
fn materialize_layer(
    temp_dir: &Path,
    archives: &[(PathBuf, Option<String>)],
    cache_key: &str,
    store: &ImageStore,
) -> BakeliteResult<(LayerRecord, Option<PathBuf>)> {
    let staging = tempfile::tempdir_in(temp_dir)?;
    let root = staging.path().join("layer");
    std::fs::create_dir_all(&root)?;

    for (archive, install_root) in archives {
        let dest = match install_root {
            Some(prefix) => root.join(prefix.trim_start_matches('/')),
            None => root.clone(),
        };
        std::fs::create_dir_all(&dest)?;
        layers::unpack(archive, &dest)?;
    }

    let packed = layers::pack_dir(&root, temp_dir)?;
    let newly_installed = store.install_archive(&packed)?;
    let layer = LayerRecord {
        digest: packed.digest.clone(),
        cache_key: cache_key.to_string(),
        size: packed.size,
        stage: "dependencies".into(),
    };
    store.record_layer(&layer)?;

    let new_blob = newly_installed.then(|| store.blob_path(&packed.digest));
    Ok((layer, new_blob))
}
