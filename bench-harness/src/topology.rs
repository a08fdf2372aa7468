//! Container topology manager.
//!
//! Brings one compose deployment of a revision up under a unique project
//! name, waits for it to become ready, discovers each node's network
//! interfaces, and tears everything down again.
//!
//! Teardown never aborts early: every container is stopped and removed
//! and every project network is removed, with failures collected into a
//! single [`TeardownWarning`].

use crate::backend::{ContainerBackend, ContainerHandle, ProjectSpec};
use crate::config::TopologyConfig;
use crate::error::{ProvisionError, TeardownWarning};
use crate::shutdown::ShutdownSignal;
use bench_types::{duration_str, RevisionDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Log line the benchmark client prints once it accepts requests.
pub const DEFAULT_READY_LINE: &str = "I am ready to interact with the system";

/// A network interface inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceHandle {
    /// Container owning the interface.
    pub container: ContainerHandle,
    /// Interface name (e.g. `eth0`).
    pub interface: String,
}

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container.name, self.interface)
    }
}

/// One node of a topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Role of the node (its compose service name).
    pub role: String,
    /// The node's container.
    pub container: ContainerHandle,
    /// Interfaces impairment may be applied to.
    pub interfaces: Vec<InterfaceHandle>,
}

/// A running deployment of one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    project: String,
    revision: String,
    nodes: Vec<Node>,
}

impl Topology {
    /// Assemble a topology from its parts.
    pub fn new(project: impl Into<String>, revision: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            project: project.into(),
            revision: revision.into(),
            nodes,
        }
    }

    /// Compose project name.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Revision identifier the topology runs.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Nodes ordered by role.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// First node with the given role.
    pub fn node(&self, role: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == role)
    }

    /// Every container in the topology.
    pub fn containers(&self) -> Vec<ContainerHandle> {
        self.nodes.iter().map(|n| n.container.clone()).collect()
    }

    /// Every interface of every node.
    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceHandle> {
        self.nodes.iter().flat_map(|n| n.interfaces.iter())
    }
}

/// How to decide a freshly started topology is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// Poll a service's logs until a line containing `pattern` appears.
    LogLine {
        /// Service whose logs are polled.
        service: String,
        /// Marker text.
        pattern: String,
    },
    /// Wait a fixed period.
    Grace {
        /// How long to wait.
        #[serde(with = "duration_str")]
        period: Duration,
    },
}

/// Provisions and tears down topologies.
pub struct TopologyManager {
    backend: Arc<dyn ContainerBackend>,
    config: TopologyConfig,
}

impl TopologyManager {
    /// Create a manager over a container backend.
    pub fn new(backend: Arc<dyn ContainerBackend>, config: TopologyConfig) -> Self {
        Self { backend, config }
    }

    /// Start a deployment of `revision` and wait until it is ready.
    ///
    /// Everything (start, readiness, interface discovery) is bounded by
    /// `startup_timeout` and abandoned as soon as `shutdown` fires. On
    /// failure or cancellation, whatever the project managed to create is
    /// torn down before the error is returned.
    pub async fn provision(
        &self,
        revision: &RevisionDescriptor,
        shutdown: &ShutdownSignal,
    ) -> Result<Topology, ProvisionError> {
        let project = self.project_name();
        info!(
            "Provisioning {} for revision {} from {}",
            project,
            revision.identifier,
            revision.source_path.display()
        );

        let timeout = self.config.startup_timeout;
        let result = tokio::select! {
            result = tokio::time::timeout(timeout, self.bring_up(&project, revision)) => result,
            _ = shutdown.cancelled() => Ok(Err(ProvisionError::Cancelled {
                project: project.clone(),
            })),
        };

        let err = match result {
            Ok(Ok(topology)) => {
                info!(
                    "Project {} ready with {} node(s)",
                    project,
                    topology.nodes().len()
                );
                return Ok(topology);
            }
            Ok(Err(e)) => e,
            Err(_) => ProvisionError::Timeout {
                project: project.clone(),
                timeout,
            },
        };

        warn!("Provisioning {} failed: {}", project, err);
        self.cleanup_partial(&project, &revision.identifier).await;
        Err(err)
    }

    /// Stop and remove every container and network of the topology.
    ///
    /// Continues past individual failures; returns them all as one warning.
    pub async fn teardown(&self, topology: Topology) -> Result<(), TeardownWarning> {
        let mut failures = Vec::new();

        for node in topology.nodes() {
            let container = &node.container;
            if let Err(e) = self
                .backend
                .stop_container(container, self.config.stop_timeout)
                .await
            {
                failures.push(format!("stop {}: {}", container.name, e));
            }
            if let Err(e) = self.backend.remove_container(container).await {
                failures.push(format!("remove {}: {}", container.name, e));
            }
        }

        match self.backend.list_networks(topology.project()).await {
            Ok(networks) => {
                for network in networks {
                    if let Err(e) = self.backend.remove_network(&network).await {
                        failures.push(format!("remove network {}: {}", network, e));
                    }
                }
            }
            Err(e) => failures.push(format!("list networks: {}", e)),
        }

        if failures.is_empty() {
            debug!("Tore down {}", topology.project());
            Ok(())
        } else {
            let warning = TeardownWarning {
                project: topology.project().to_string(),
                failures,
            };
            warn!("{}", warning);
            Err(warning)
        }
    }

    fn project_name(&self) -> String {
        let id = uuid::Uuid::new_v4().as_simple().to_string();
        format!("{}-{}", self.config.project_prefix, &id[..12])
    }

    async fn bring_up(
        &self,
        project: &str,
        revision: &RevisionDescriptor,
    ) -> Result<Topology, ProvisionError> {
        let spec = ProjectSpec {
            project: project.to_string(),
            compose_file: self.config.compose_file.clone(),
            working_dir: revision.source_path.clone(),
            build: self.config.build,
        };
        self.backend
            .start_project(&spec)
            .await
            .map_err(|source| ProvisionError::Start {
                project: project.to_string(),
                source,
            })?;

        let containers = self.backend.list_containers(project).await?;
        if containers.is_empty() {
            return Err(ProvisionError::NoContainers {
                project: project.to_string(),
            });
        }

        self.wait_ready(project, &containers).await?;

        let mut nodes = Vec::with_capacity(containers.len());
        for container in containers {
            let interfaces = self
                .discover_interfaces(&container)
                .await?
                .into_iter()
                .map(|interface| InterfaceHandle {
                    container: container.clone(),
                    interface,
                })
                .collect();
            nodes.push(Node {
                role: container.service.clone(),
                container,
                interfaces,
            });
        }

        Ok(Topology::new(project, revision.identifier.clone(), nodes))
    }

    async fn wait_ready(
        &self,
        project: &str,
        containers: &[ContainerHandle],
    ) -> Result<(), ProvisionError> {
        match &self.config.readiness {
            ReadinessProbe::Grace { period } => {
                debug!("Waiting {:?} grace period for {}", period, project);
                tokio::time::sleep(*period).await;
                Ok(())
            }
            ReadinessProbe::LogLine { service, pattern } => {
                let container = containers
                    .iter()
                    .find(|c| &c.service == service)
                    .ok_or_else(|| ProvisionError::MissingService {
                        project: project.to_string(),
                        service: service.clone(),
                    })?;
                loop {
                    let logs = self.backend.logs(container).await?;
                    if logs.contains(pattern.as_str()) {
                        debug!("{} reported ready", container.name);
                        return Ok(());
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    async fn discover_interfaces(
        &self,
        container: &ContainerHandle,
    ) -> Result<Vec<String>, ProvisionError> {
        let cmd = vec!["ip".to_string(), "link".to_string(), "show".to_string()];
        let result = self.backend.exec(container, cmd).await?;
        if !result.success() {
            return Err(ProvisionError::InterfaceDiscovery {
                container: container.name.clone(),
                detail: format!("exit={}, stderr={}", result.exit_code, result.stderr.trim()),
            });
        }
        Ok(parse_interfaces(&result.stdout, &self.config.interface_prefix))
    }

    async fn cleanup_partial(&self, project: &str, revision: &str) {
        let containers = match self.backend.list_containers(project).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!("Could not list containers of {}: {}", project, e);
                Vec::new()
            }
        };
        let nodes = containers
            .into_iter()
            .map(|container| Node {
                role: container.service.clone(),
                container,
                interfaces: Vec::new(),
            })
            .collect();
        // Teardown logs its own warning.
        let _ = self.teardown(Topology::new(project, revision, nodes)).await;

        if let Err(e) = self.backend.remove_project(project).await {
            warn!("Could not take down project {}: {}", project, e);
        }
    }
}

/// Interface names from `ip link show` output that start with `prefix`.
///
/// Lines look like `7: eth0@if8: <BROADCAST,...>`; the `@ifN` peer suffix
/// is dropped.
pub fn parse_interfaces(output: &str, prefix: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in output.lines() {
        let mut fields = line.splitn(3, ": ");
        let (Some(index), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let name = name.split('@').next().unwrap_or(name);
        if name.starts_with(prefix) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
