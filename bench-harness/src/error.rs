//! Error types for wanbench-harness.
//!
//! Everything that can go wrong inside one run is converted into a
//! `Failure` run record at the executor boundary; these types never cross
//! the matrix driver as errors.

use std::path::PathBuf;
use std::time::Duration;

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker API error.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Docker Compose CLI error.
    #[error("compose error: {0}")]
    Compose(String),

    /// Container or network does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other runtime failure (used by test backends).
    #[error("container backend error: {0}")]
    Backend(String),

    /// I/O error while spawning an external tool.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to bring a topology up.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// `docker compose up` failed.
    #[error("failed to start project {project}: {source}")]
    Start {
        /// Compose project name.
        project: String,
        /// Underlying cause.
        #[source]
        source: ContainerError,
    },

    /// The project started but no container belongs to it.
    #[error("project {project} has no containers")]
    NoContainers {
        /// Compose project name.
        project: String,
    },

    /// The readiness probe names a service the project does not run.
    #[error("project {project} has no service {service:?}")]
    MissingService {
        /// Compose project name.
        project: String,
        /// Service the probe waits on.
        service: String,
    },

    /// Interface discovery inside a container failed.
    #[error("interface discovery failed in {container}: {detail}")]
    InterfaceDiscovery {
        /// Container name.
        container: String,
        /// Command output or error.
        detail: String,
    },

    /// Nodes were not ready within the startup timeout.
    #[error("project {project} not ready after {timeout:?}")]
    Timeout {
        /// Compose project name.
        project: String,
        /// The startup timeout that elapsed.
        timeout: Duration,
    },

    /// Shutdown was requested while the project was starting.
    #[error("provisioning of {project} cancelled")]
    Cancelled {
        /// Compose project name.
        project: String,
    },

    /// Container runtime error during provisioning.
    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// Failure to apply or clear a network impairment.
#[derive(Debug, thiserror::Error)]
pub enum ImpairmentError {
    /// A queueing discipline is already installed on the interface.
    #[error("interface {target} is not clean: {qdisc}")]
    NotClean {
        /// Interface, as `container:iface`.
        target: String,
        /// The installed root qdisc.
        qdisc: String,
    },

    /// A profile is already active on the interface and has not been cleared.
    #[error("interface {target} already has an active profile ({profile})")]
    AlreadyActive {
        /// Interface, as `container:iface`.
        target: String,
        /// Label of the active profile.
        profile: String,
    },

    /// `tc` exited non-zero while installing the qdisc.
    #[error("tc failed on {target}: exit={exit_code}, stderr={stderr}")]
    CommandFailed {
        /// Interface, as `container:iface`.
        target: String,
        /// Exit code from `tc`.
        exit_code: i64,
        /// Standard error output.
        stderr: String,
    },

    /// The qdisc could not be removed and the interface is still impaired.
    #[error("clear failed on {target}: exit={exit_code}, stderr={stderr}")]
    ClearFailed {
        /// Interface, as `container:iface`.
        target: String,
        /// Exit code from `tc`.
        exit_code: i64,
        /// Standard error output.
        stderr: String,
    },

    /// Container runtime error while running `tc`.
    #[error(transparent)]
    Backend(#[from] ContainerError),
}

/// Non-fatal teardown problems, collected across every node.
#[derive(Debug, Clone, thiserror::Error)]
#[error("teardown of {project} finished with {} problem(s): {}", .failures.len(), .failures.join("; "))]
pub struct TeardownWarning {
    /// Compose project name.
    pub project: String,
    /// One entry per failed stop/remove step.
    pub failures: Vec<String>,
}

/// Workload errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    /// The workload did not finish within its deadline.
    #[error("workload exceeded its deadline of {after:?}")]
    Timeout {
        /// Deadline that elapsed (test duration plus grace).
        after: Duration,
    },

    /// The topology has no node with the role the workload targets.
    #[error("topology has no node with role {role:?}")]
    MissingNode {
        /// Role that was looked up.
        role: String,
    },

    /// HTTP client error outside of individual requests.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The workload task panicked or was aborted.
    #[error("workload task failed: {0}")]
    Panicked(String),

    /// Workload-specific failure.
    #[error("workload failed: {0}")]
    Failed(String),
}

/// Revision resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum RevisionError {
    /// The revision does not exist.
    #[error("revision not found: {identifier}")]
    NotFound {
        /// Requested identifier.
        identifier: String,
    },

    /// A git command failed.
    #[error("git {args} failed: {stderr}")]
    Git {
        /// Arguments passed to git.
        args: String,
        /// Standard error output.
        stderr: String,
    },

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A record for this cell already exists.
    #[error("record already exists: {path}")]
    AlreadyExists {
        /// Existing record file.
        path: PathBuf,
    },

    /// A record could not be encoded or decoded.
    #[error("record encoding error at {path}: {source}")]
    Encoding {
        /// Path involved.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Failure escaping a run task at the matrix boundary.
#[derive(Debug, thiserror::Error)]
pub enum UnexpectedRunError {
    /// The run task panicked.
    #[error("run task panicked: {0}")]
    Panicked(String),

    /// The run task was cancelled by the runtime.
    #[error("run task aborted: {0}")]
    Aborted(String),

    /// The runner returned a record for a different cell.
    #[error("runner returned a record for {returned} while running {expected}")]
    Misattributed {
        /// Cell that was run.
        expected: String,
        /// Cell the record claims.
        returned: String,
    },
}

/// Report writing errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Filesystem error.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Dataset could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
