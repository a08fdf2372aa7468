//! # wanbench-harness
//!
//! Runs benchmark matrices against containerized deployments under
//! emulated network conditions.
//!
//! ## Pipeline
//!
//! - **Revisions**: [`RevisionProvider`] resolves identifiers to source trees
//! - **Topology**: [`TopologyManager`] brings a compose project up and down
//! - **Impairment**: [`ImpairmentController`] installs and removes netem qdiscs
//! - **Execution**: [`RunExecutor`] turns one cell into one [`RunRecord`]
//! - **Matrix**: [`MatrixDriver`] runs every cell and persists to [`RunStore`]
//! - **Aggregation**: [`Aggregator`] and [`ReportDataset`] summarize the store
//!
//! ## Example
//!
//! ```ignore
//! use wanbench_harness::*;
//!
//! let backend = Arc::new(DockerBackend::connect()?);
//! let executor = RunExecutor::new(
//!     TopologyManager::new(backend.clone(), config.topology.clone()),
//!     ImpairmentController::new(Arc::new(ContainerTcBackend::new(backend))),
//!     Arc::new(HttpLoadWorkload::new(config.workload.clone())?),
//!     settings,
//! );
//! let driver = MatrixDriver::new(Arc::new(executor), store, revisions, driver_config, signal);
//! let state = driver.run(&revisions, &config.profiles, 3).await;
//! ```
//!
//! [`RunRecord`]: bench_types::RunRecord

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod impairment;
pub mod mock;
pub mod netem;
pub mod report;
pub mod revision;
pub mod sampler;
pub mod shutdown;
pub mod store;
pub mod topology;
pub mod workload;

pub use aggregator::{AggregateReport, Aggregator};
pub use backend::{ContainerBackend, ContainerHandle, DockerBackend, ExecResult, ProjectSpec, StatsSample};
pub use config::{BenchConfig, ConfigError};
pub use driver::{DriverConfig, MatrixDriver};
pub use error::{
    ContainerError, ImpairmentError, ProvisionError, ReportError, RevisionError, StoreError,
    TeardownWarning, UnexpectedRunError, WorkloadError,
};
pub use executor::{CellRunner, ExecutorSettings, RunExecutor};
pub use impairment::{ContainerTcBackend, ImpairmentBackend, ImpairmentController};
pub use mock::{MockContainerBackend, MockNetem, SyntheticWorkload};
pub use netem::{NetemCommand, QdiscState};
pub use report::{JsonReportWriter, ReportDataset, ReportRenderer, SUMMARY_FILE_NAME};
pub use revision::{GitRevisionProvider, RevisionProvider, StaticRevisionProvider};
pub use sampler::StatsSampler;
pub use shutdown::{ShutdownHandle, ShutdownSignal};
pub use store::{LoadIssue, LoadedRecords, RunStore};
pub use topology::{InterfaceHandle, Node, ReadinessProbe, Topology, TopologyManager};
pub use workload::{HttpLoadWorkload, MetricsRecorder, Workload, WorkloadContext};
