//! Stage: Base environment provisioning.
//!
//! Resolves the pinned base image, installs its layers into the blob store,
//! and establishes the environment invariants and working directory that
//! every later stage (and the launched process) observes.

use super::{BuildCtx, log_task_error, task_start};
use crate::build::types::BaseOutput;
use crate::layers::chain_key;
use crate::pipeline::PipelineTask;
use crate::recipe::ImageRecipe;
use crate::store::{BasePuller, ImageStore, LayerRecord};
use async_trait::async_trait;
use bakelite_shared::errors::BakeliteResult;
use std::collections::BTreeMap;

/// PATH used when the base image declares none.
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

pub struct BaseEnvTask;

#[async_trait]
impl PipelineTask<BuildCtx> for BaseEnvTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let image = task_start(&ctx, task_name).await;

        let (recipe, store) = {
            let ctx = ctx.lock().await;
            (ctx.recipe.clone(), ctx.store.clone())
        };

        let output = run_base_env(&recipe, &store)
            .await
            .inspect_err(|e| log_task_error(&image, task_name, e))?;

        let mut ctx = ctx.lock().await;
        // Base identity, env, and workdir all feed the rolling key: changing
        // any of them invalidates every later layer.
        let base_identity = output
            .base
            .digest
            .clone()
            .or_else(|| output.base.reference.clone())
            .unwrap_or_else(|| "scratch".to_string());
        let env_blob = serde_json::to_vec(&output.env).unwrap_or_default();
        let next_key = chain_key(
            &ctx.cache_key,
            &[
                b"base",
                base_identity.as_bytes(),
                &env_blob,
                recipe.workdir.as_bytes(),
            ],
        );
        ctx.cache_key = next_key;
        ctx.env = output.env;
        ctx.layers.extend(output.layers);
        ctx.base = Some(output.base);

        Ok(())
    }

    fn name(&self) -> &str {
        "base_provision"
    }
}

struct BaseEnvOutput {
    base: BaseOutput,
    env: BTreeMap<String, String>,
    layers: Vec<LayerRecord>,
}

/// Pull the base (unless scratch) and compute the image environment:
/// base env, then recipe invariants, then the PATH extension for the
/// user-local tool directory.
async fn run_base_env(recipe: &ImageRecipe, store: &ImageStore) -> BakeliteResult<BaseEnvOutput> {
    let mut env: BTreeMap<String, String> = BTreeMap::new();
    let mut layers = Vec::new();

    let base = if recipe.is_scratch_base() {
        tracing::info!(image = %recipe.name, "scratch base, skipping pull");
        BaseOutput {
            reference: None,
            digest: None,
        }
    } else {
        let pulled = BasePuller::new().pull(&recipe.base, store).await?;

        if let Some(config) = &pulled.config
            && let Some(inner) = config.config()
            && let Some(base_env) = inner.env()
        {
            for entry in base_env {
                if let Some((key, value)) = entry.split_once('=') {
                    env.insert(key.to_string(), value.to_string());
                }
            }
        }

        layers = pulled.layers;
        BaseOutput {
            reference: Some(pulled.reference),
            digest: pulled.digest,
        }
    };

    for (key, value) in &recipe.env {
        env.insert(key.clone(), value.clone());
    }

    if let Some(tool_path) = &recipe.tool_path {
        let inherited = env
            .get("PATH")
            .cloned()
            .unwrap_or_else(|| DEFAULT_PATH.to_string());
        env.insert("PATH".to_string(), format!("{tool_path}:{inherited}"));
    }

    Ok(BaseEnvOutput { base, env, layers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::runtime::layout::FilesystemLayout;
    use tempfile::TempDir;

    fn recipe() -> ImageRecipe {
        serde_json::from_value(serde_json::json!({
            "name": "svc",
            "base": "scratch",
            "workdir": "/app",
            "env": { "PYTHONDONTWRITEBYTECODE": "1", "PYTHONUNBUFFERED": "1" },
            "tool_path": "/root/.local/bin",
            "dependencies": { "declaration": "manifest.json", "lock": "manifest.lock.json" },
            "storage": { "directories": ["uploads"] },
            "expose": 8000,
            "command": ["server"]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn scratch_base_sets_invariants_and_path() {
        let temp = TempDir::new().unwrap();
        let layout = FilesystemLayout::new(temp.path().to_path_buf());
        layout.prepare().unwrap();
        let db = Database::open(&layout.db_path()).unwrap();
        let store = ImageStore::new(&layout, db).unwrap();

        let output = run_base_env(&recipe(), &store).await.unwrap();

        assert!(output.layers.is_empty());
        assert_eq!(output.env.get("PYTHONUNBUFFERED").unwrap(), "1");
        let path = output.env.get("PATH").unwrap();
        assert!(path.starts_with("/root/.local/bin:"));
    }
}
