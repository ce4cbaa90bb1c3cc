//! Stage: Workspace materialization.
//!
//! Copies the application source tree into the image under the working
//! directory, after dependency installation, so source-only edits invalidate
//! this and later layers but never the dependency layer. Pure copy: no
//! transformation of contents, modes preserved, mtimes preserved.

use super::{BuildCtx, log_task_error, task_start};
use crate::layers::{self, chain_key};
use crate::pipeline::PipelineTask;
use crate::store::{ImageStore, LayerRecord};
use async_trait::async_trait;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use filetime::FileTime;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct WorkspaceMaterializeTask;

#[async_trait]
impl PipelineTask<BuildCtx> for WorkspaceMaterializeTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let image = task_start(&ctx, task_name).await;

        let (context_dir, workdir, exclude, temp_dir, store, prev_key) = {
            let ctx = ctx.lock().await;
            (
                ctx.context_dir.clone(),
                ctx.recipe.workdir.clone(),
                ctx.recipe.exclude.clone(),
                ctx.layout.temp_dir(),
                ctx.store.clone(),
                ctx.cache_key.clone(),
            )
        };

        let output = tokio::task::spawn_blocking(move || {
            run_workspace(&context_dir, &workdir, &exclude, &temp_dir, &store, &prev_key)
        })
        .await
        .map_err(|e| BakeliteError::Internal(format!("workspace task failed: {e}")))?
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
        "workspace_materialize"
    }
}

struct WorkspaceOutput {
    layer: LayerRecord,
    new_blob: Option<PathBuf>,
}

fn run_workspace(
    context_dir: &Path,
    workdir: &str,
    exclude: &[String],
    temp_dir: &Path,
    store: &ImageStore,
    prev_key: &str,
) -> BakeliteResult<WorkspaceOutput> {
    if !context_dir.is_dir() {
        return Err(BakeliteError::Storage(format!(
            "build context not found at {}",
            context_dir.display()
        )));
    }

    let tree_digest = digest_tree(context_dir, exclude)?;
    let cache_key = chain_key(
        prev_key,
        &[b"workspace", tree_digest.as_bytes(), workdir.as_bytes()],
    );

    if let Some(layer) = store.lookup_layer(&cache_key)? {
        tracing::info!("workspace unchanged, reusing cached layer");
        return Ok(WorkspaceOutput {
            layer,
            new_blob: None,
        });
    }

    let staging = tempfile::tempdir_in(temp_dir)?;
    let root = staging.path().join("layer");
    let dest = root.join(workdir.trim_start_matches('/'));
    copy_tree(context_dir, &dest, exclude)?;

    let packed = layers::pack_dir(&root, temp_dir)?;
    let newly_installed = store.install_archive(&packed)?;
    let layer = LayerRecord {
        digest: packed.digest.clone(),
        cache_key,
        size: packed.size,
        stage: "workspace".into(),
    };
    store.record_layer(&layer)?;

    tracing::info!(digest = %layer.digest, "materialized workspace layer");

    let new_blob = newly_installed.then(|| store.blob_path(&packed.digest));
    Ok(WorkspaceOutput { layer, new_blob })
}

/// Whether a context-relative path matches an exclusion prefix.
fn is_excluded(rel: &Path, patterns: &[String]) -> bool {
    let rel = rel.to_string_lossy();
    patterns
        .iter()
        .any(|p| rel.as_ref() == p.as_str() || rel.starts_with(&format!("{p}/")))
}

/// Deterministic digest of the source tree: sorted walk over relative path,
/// mode, and contents (or link target).
fn digest_tree(root: &Path, exclude: &[String]) -> BakeliteResult<String> {
    use std::os::unix::fs::PermissionsExt;

    let mut hasher = Sha256::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            !is_excluded(rel, exclude)
        });

    for entry in walker {
        let entry =
            entry.map_err(|e| BakeliteError::Storage(format!("walking {}: {e}", root.display())))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| BakeliteError::Internal(format!("path outside context: {e}")))?;
        let metadata = entry.path().symlink_metadata()?;

        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(metadata.permissions().mode().to_le_bytes());

        if entry.file_type().is_symlink() {
            hasher.update(std::fs::read_link(entry.path())?.to_string_lossy().as_bytes());
        } else if entry.file_type().is_file() {
            hasher.update(metadata.len().to_le_bytes());
            let mut file = std::fs::File::open(entry.path())?;
            std::io::copy(&mut file, &mut hasher)?;
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Copy the context into `dest` without transformation. Modes come along via
/// `fs::copy`; mtimes are restored explicitly.
fn copy_tree(src: &Path, dest: &Path, exclude: &[String]) -> BakeliteResult<()> {
    std::fs::create_dir_all(dest)?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let rel = e.path().strip_prefix(src).unwrap_or(e.path());
            !is_excluded(rel, exclude)
        });

    for entry in walker {
        let entry =
            entry.map_err(|e| BakeliteError::Storage(format!("walking {}: {e}", src.display())))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| BakeliteError::Internal(format!("path outside context: {e}")))?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            let metadata = entry.path().metadata()?;
            filetime::set_file_mtime(&target, FileTime::from_last_modification_time(&metadata))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn excluded_paths_do_not_affect_digest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("ctx");
        std::fs::create_dir_all(root.join("app")).unwrap();
        std::fs::write(root.join("app/main.py"), b"print()").unwrap();

        let before = digest_tree(&root, &["target".into()]).unwrap();

        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::write(root.join("target/debug/junk"), b"junk").unwrap();
        let after = digest_tree(&root, &["target".into()]).unwrap();

        assert_eq!(before, after);

        std::fs::write(root.join("app/main.py"), b"print('changed')").unwrap();
        let changed = digest_tree(&root, &["target".into()]).unwrap();
        assert_ne!(before, changed);
    }

    #[test]
    fn copy_tree_is_a_pure_copy() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("pkg")).unwrap();
        std::fs::write(src.join("pkg/mod.py"), b"x = 1").unwrap();
        std::fs::write(src.join("skip.me"), b"no").unwrap();

        let dest = temp.path().join("dest");
        copy_tree(&src, &dest, &["skip.me".into()]).unwrap();

        assert_eq!(std::fs::read(dest.join("pkg/mod.py")).unwrap(), b"x = 1");
        assert!(!dest.join("skip.me").exists());

        let src_mtime = FileTime::from_last_modification_time(
            &src.join("pkg/mod.py").metadata().unwrap(),
        );
        let dest_mtime = FileTime::from_last_modification_time(
            &dest.join("pkg/mod.py").metadata().unwrap(),
        );
        assert_eq!(src_mtime, dest_mtime);
    }
}
