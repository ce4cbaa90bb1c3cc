//! Container lifecycle.
//!
//! A [`Container`] is a handle to one booted (or bootable) image instance.
//! Runtime state machine: `container-created → process-launched →
//! {running | exited(code)}`. Exit is terminal: there is no supervised
//! restart at this layer — restart policy belongs to the operator.

mod boot;
pub mod config;
mod manager;

pub use config::ContainerConfig;
pub(crate) use manager::ContainerManager;

use boot::ContainerBooter;
use crate::runtime::RuntimeInner;
use crate::runtime::types::{ContainerId, ContainerInfo};
use bakelite_shared::errors::{BakeliteError, BakeliteResult};

/// Handle to a container.
///
/// Conceptually plays the role `std::process::Child` plays for
/// `std::process::Command`: the process itself belongs to the engine, the
/// handle gives callers control over it.
pub struct Container {
    id: ContainerId,
    runtime: RuntimeInner,
}

impl Container {
    pub(crate) fn new(runtime: RuntimeInner, id: ContainerId) -> Self {
        Self { id, runtime }
    }

    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Boot the container and wait for its foreground process to exit.
    ///
    /// Runs the boot pipeline for the current status (fresh boot or
    /// restart), records the running PID, then blocks until the process
    /// exits and returns its exit code. The container stops when the
    /// process stops, by design: one foreground process per container.
    pub async fn run(&self) -> BakeliteResult<i32> {
        let (config, state) = self
            .runtime
            .containers
            .get(&self.id)?
            .ok_or_else(|| BakeliteError::NotFound(self.id.to_string()))?;

        if !state.status.can_boot() {
            return Err(BakeliteError::InvalidState(format!(
                "container {} is {}",
                self.id.short(),
                state.status
            )));
        }

        let image = self
            .runtime
            .images
            .get_record(&config.image)?
            .ok_or_else(|| BakeliteError::NotFound(format!("image {}", config.image)))?;

        let booted = ContainerBooter::new(
            self.runtime.layout.clone(),
            self.runtime.images.clone(),
            config.clone(),
            image,
            state.status,
        )
        .build()
        .await?;

        let mut child = booted.child;
        let pid = child
            .id()
            .ok_or_else(|| BakeliteError::Launch("spawned process has no pid".into()))?;
        self.runtime
            .containers
            .update_state(&self.id, |s| s.mark_running(pid))?;

        tracing::info!(
            container = %self.id.short(),
            pid,
            port = config.declared_port,
            "container process launched"
        );

        // Single foreground process: waiting on it IS the container's
        // lifetime.
        let status = child.wait().await?;
        let code = status.code().unwrap_or(-1);
        self.runtime
            .containers
            .update_state(&self.id, |s| s.mark_exited(code))?;

        tracing::info!(
            container = %self.id.short(),
            exit_code = code,
            "container process exited"
        );

        Ok(code)
    }

    pub fn info(&self) -> BakeliteResult<ContainerInfo> {
        let (config, state) = self
            .runtime
            .containers
            .get(&self.id)?
            .ok_or_else(|| BakeliteError::NotFound(self.id.to_string()))?;

        Ok(ContainerInfo {
            id: config.id,
            name: config.name,
            image: config.image,
            status: state.status,
            created_at: config.created_at,
            declared_port: config.declared_port,
            exit_code: state.exit_code,
        })
    }
}
