//! Container runtime abstraction.
//!
//! The topology manager, the impairment controller and the stats sampler
//! talk to containers only through [`ContainerBackend`]:
//! - `start_project()` brings a compose project up
//! - `remove_project()` takes down whatever a project left behind
//! - `list_containers()` / `list_networks()` discover what it created
//! - `exec()` / `logs()` / `stats()` inspect running containers
//! - `stop_container()` / `remove_container()` / `remove_network()` tear down
//!
//! [`DockerBackend`] drives the real Docker daemon; `MockContainerBackend`
//! (in [`crate::mock`]) stands in for it in tests.

mod docker;

pub use docker::DockerBackend;

use crate::error::ContainerError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A running container that belongs to a compose project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerHandle {
    /// Container ID.
    pub id: String,
    /// Container name (`<project>-<service>-<n>`).
    pub name: String,
    /// Compose service the container runs.
    pub service: String,
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What to start for one topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSpec {
    /// Unique compose project name.
    pub project: String,
    /// Compose file, absolute or relative to `working_dir`.
    pub compose_file: PathBuf,
    /// Directory compose runs in (the revision's source tree).
    pub working_dir: PathBuf,
    /// Rebuild images before starting.
    pub build: bool,
}

/// Result of executing a command inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i64,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One resource usage snapshot of a container.
///
/// Counters are cumulative; rates come from differences between snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSample {
    /// Total CPU time consumed by the container (ns).
    pub cpu_total: u64,
    /// Total CPU time of the host (ns).
    pub system_cpu: u64,
    /// Memory in use (bytes).
    pub memory_usage: u64,
    /// Memory limit (bytes).
    pub memory_limit: u64,
    /// Received plus transmitted bytes across all interfaces.
    pub net_bytes: u64,
}

/// Capabilities the harness needs from a container runtime.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Build (optionally) and start every service of a compose project.
    async fn start_project(&self, spec: &ProjectSpec) -> Result<(), ContainerError>;

    /// Remove every container, network and volume labelled with the project.
    ///
    /// Used after a failed start, when the project may be half created.
    async fn remove_project(&self, project: &str) -> Result<(), ContainerError>;

    /// Containers of a project, ordered by service then name.
    async fn list_containers(&self, project: &str) -> Result<Vec<ContainerHandle>, ContainerError>;

    /// Run a command inside a container with network admin privileges.
    async fn exec(
        &self,
        container: &ContainerHandle,
        cmd: Vec<String>,
    ) -> Result<ExecResult, ContainerError>;

    /// Everything the container has logged so far.
    async fn logs(&self, container: &ContainerHandle) -> Result<String, ContainerError>;

    /// One resource usage snapshot.
    async fn stats(&self, container: &ContainerHandle) -> Result<StatsSample, ContainerError>;

    /// Stop a container, killing it after `timeout`.
    async fn stop_container(
        &self,
        container: &ContainerHandle,
        timeout: Duration,
    ) -> Result<(), ContainerError>;

    /// Remove a container and its anonymous volumes.
    async fn remove_container(&self, container: &ContainerHandle) -> Result<(), ContainerError>;

    /// Names of the networks a project created.
    async fn list_networks(&self, project: &str) -> Result<Vec<String>, ContainerError>;

    /// Remove a network.
    async fn remove_network(&self, name: &str) -> Result<(), ContainerError>;
}
