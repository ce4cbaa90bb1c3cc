//! Stage: Launch declaration.
//!
//! Declares the externally reachable port and the exact startup command in
//! the image configuration. Nothing executes during build; the declaration
//! takes effect when a container boots the image.

use super::{BuildCtx, log_task_error, task_start};
use crate::layers::chain_key;
use crate::pipeline::PipelineTask;
use crate::store::ImageRecord;
use async_trait::async_trait;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use chrono::Utc;
use oci_spec::image::{
    Arch, ConfigBuilder, ImageConfigurationBuilder, Os, RootFsBuilder,
};
use ulid::Ulid;

pub struct LaunchDeclareTask;

#[async_trait]
impl PipelineTask<BuildCtx> for LaunchDeclareTask {
    async fn run(self: Box<Self>, ctx: BuildCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let image = task_start(&ctx, task_name).await;

        let mut ctx = ctx.lock().await;

        let env: Vec<String> = ctx
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let recipe = ctx.recipe.clone();

        let config = ConfigBuilder::default()
            .env(env)
            .working_dir(recipe.workdir.clone())
            .exposed_ports(vec![format!("{}/tcp", recipe.expose)])
            .cmd(recipe.command.clone())
            .build()
            .map_err(|e| BakeliteError::Image(format!("building image config: {e}")))?;

        let diff_ids: Vec<String> = ctx
            .layers
            .iter()
            .map(|layer| format!("sha256:{}", layer.digest))
            .collect();
        let rootfs = RootFsBuilder::default()
            .typ("layers".to_string())
            .diff_ids(diff_ids)
            .build()
            .map_err(|e| BakeliteError::Image(format!("building rootfs section: {e}")))?;

        let image_config = ImageConfigurationBuilder::default()
            .created(Utc::now().to_rfc3339())
            .architecture(host_arch())
            .os(Os::Linux)
            .config(config)
            .rootfs(rootfs)
            .build()
            .map_err(|e| BakeliteError::Image(format!("building image configuration: {e}")))?;

        let config_bytes = serde_json::to_vec_pretty(&image_config)
            .map_err(|e| BakeliteError::Image(format!("serializing image configuration: {e}")))?;
        let (config_digest, newly_installed) = ctx
            .store
            .install_bytes(&config_bytes)
            .inspect_err(|e| log_task_error(&image, task_name, e))?;
        if newly_installed {
            let blob = ctx.store.blob_path(&config_digest);
            ctx.guard.track(blob);
        }

        let next_key = chain_key(&ctx.cache_key, &[b"launch", &config_bytes]);
        ctx.cache_key = next_key;

        let record = ImageRecord {
            id: Ulid::new().to_string().to_lowercase(),
            reference: recipe.name.clone(),
            created_at: Utc::now(),
            base: ctx.base.as_ref().and_then(|b| b.reference.clone()),
            layers: ctx.layers.clone(),
            config_digest,
            storage_paths: recipe.storage_paths(),
        };

        tracing::info!(
            image = %record.reference,
            port = recipe.expose,
            command = ?recipe.command,
            "declared launch configuration"
        );

        ctx.record = Some(record);
        Ok(())
    }

    fn name(&self) -> &str {
        "launch_declare"
    }
}

fn host_arch() -> Arch {
    match std::env::consts::ARCH {
        "x86_64" => Arch::Amd64,
        "aarch64" => Arch::ARM64,
        other => Arch::Other(other.to_string()),
    }
}
