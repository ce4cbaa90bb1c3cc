//! Core identifier and lifecycle types for containers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique container identifier (ULID, 26 chars, sortable by creation time).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    /// Wrap an identifier supplied by the user (e.g. from the CLI).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container lifecycle status.
///
/// State machine: `Created → Running → Stopped`. A stopped container can be
/// booted again (the rootfs and everything under the storage prefix are
/// reused); exit of the foreground process always returns it to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// Created but never booted.
    Created,
    /// Foreground process is running.
    Running,
    /// Foreground process exited (exit code recorded in state).
    Stopped,
}

impl ContainerStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    /// Whether the boot pipeline may run from this status.
    pub fn can_boot(&self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Stopped)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Mutable container state (Podman-style separation from immutable config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    pub status: ContainerStatus,
    /// PID of the foreground process while running.
    pub pid: Option<u32>,
    /// Exit code of the last run, if the process has exited.
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ContainerState {
    pub fn new() -> Self {
        Self {
            status: ContainerStatus::Created,
            pid: None,
            exit_code: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn set_status(&mut self, status: ContainerStatus) {
        self.status = status;
    }

    pub fn mark_running(&mut self, pid: u32) {
        self.status = ContainerStatus::Running;
        self.pid = Some(pid);
        self.exit_code = None;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    /// Record a normal process exit. Exit is terminal for the container's
    /// useful life; only an explicit re-boot leaves `Stopped`.
    pub fn mark_exited(&mut self, code: i32) {
        self.status = ContainerStatus::Stopped;
        self.pid = None;
        self.exit_code = Some(code);
        self.finished_at = Some(Utc::now());
    }

    /// Record an abnormal death detected from the outside (dead PID during
    /// recovery). The exit code is unknown in this case.
    pub fn mark_crashed(&mut self) {
        self.status = ContainerStatus::Stopped;
        self.pid = None;
        self.finished_at = Some(Utc::now());
    }
}

impl Default for ContainerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only container metadata for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: Option<String>,
    pub image: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    pub declared_port: u16,
    pub exit_code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_id_is_ulid_shaped() {
        let id = ContainerId::new();
        assert_eq!(id.as_str().len(), 26);
        assert_eq!(id.short().len(), 12);
    }

    #[test]
    fn state_transitions() {
        let mut state = ContainerState::new();
        assert_eq!(state.status, ContainerStatus::Created);
        assert!(state.status.can_boot());

        state.mark_running(1234);
        assert!(state.status.is_active());
        assert_eq!(state.pid, Some(1234));

        state.mark_exited(3);
        assert_eq!(state.status, ContainerStatus::Stopped);
        assert_eq!(state.exit_code, Some(3));
        assert_eq!(state.pid, None);
        assert!(state.status.can_boot());
    }
}
