//! Task: Foreground process spawn.
//!
//! Launches the declared command as the container's single foreground
//! process: image environment, image working directory, inherited stdio.
//! The container runs exactly as long as this process does.

use super::{BootCtx, log_task_error, task_start};
use crate::container::config::ContainerConfig;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

pub struct SpawnTask;

#[async_trait]
impl PipelineTask<BootCtx> for SpawnTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> BakeliteResult<()> {
        let task_name = self.name();
        let container = task_start(&ctx, task_name).await;

        let (config, rootfs) = {
            let ctx = ctx.lock().await;
            let layout = ctx.container_layout.as_ref().ok_or_else(|| {
                BakeliteError::Internal("filesystem task must run first".into())
            })?;
            (ctx.config.clone(), layout.rootfs_dir())
        };

        let child = spawn_process(&config, &rootfs)
            .inspect_err(|e| log_task_error(&container, task_name, e))?;

        let mut ctx = ctx.lock().await;
        ctx.child = Some(child);
        Ok(())
    }

    fn name(&self) -> &str {
        "process_spawn"
    }
}

/// Spawn the foreground process with the image environment and working
/// directory. Inherited stdio keeps log lines observable immediately.
fn spawn_process(config: &ContainerConfig, rootfs: &Path) -> BakeliteResult<Child> {
    if config.command.is_empty() {
        return Err(BakeliteError::Launch(
            "image declares no startup command".into(),
        ));
    }

    let workdir = rootfs.join(config.workdir.trim_start_matches('/'));
    if !workdir.is_dir() {
        return Err(BakeliteError::Launch(format!(
            "working directory {} missing from rootfs",
            config.workdir
        )));
    }

    let program = resolve_program(&config.command[0], rootfs);

    let mut cmd = Command::new(&program);
    cmd.args(&config.command[1..]);
    cmd.current_dir(&workdir);

    // Only the image environment reaches the process.
    cmd.env_clear();
    for entry in &config.env {
        if let Some((key, value)) = entry.split_once('=') {
            cmd.env(key, value);
        }
    }

    cmd.stdin(Stdio::inherit());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());

    cmd.spawn().map_err(|e| {
        BakeliteError::Launch(format!(
            "failed to spawn {:?} (program {}): {e}",
            config.command,
            program.display()
        ))
    })
}

/// Absolute commands prefer the rootfs copy when one exists; anything else
/// resolves through the image PATH on the host.
fn resolve_program(argv0: &str, rootfs: &Path) -> PathBuf {
    if argv0.starts_with('/') {
        let inside = rootfs.join(argv0.trim_start_matches('/'));
        if inside.exists() {
            return inside;
        }
    }
    PathBuf::from(argv0)
}
