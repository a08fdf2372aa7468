//! Docker implementation of [`ContainerBackend`].
//!
//! Compose projects are started through the `docker compose` CLI (compose
//! is not part of the Engine API); everything else goes through bollard.

use super::{ContainerBackend, ContainerHandle, ExecResult, ProjectSpec, StatsSample};
use crate::error::ContainerError;
use async_trait::async_trait;
use bollard::container::{
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StatsOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::network::ListNetworksOptions;
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const PROJECT_LABEL: &str = "com.docker.compose.project";
const SERVICE_LABEL: &str = "com.docker.compose.service";

/// Container backend talking to the local Docker daemon.
#[derive(Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> Result<Self, ContainerError> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }

    fn project_filter(project: &str) -> HashMap<String, Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", PROJECT_LABEL, project)],
        );
        filters
    }
}

/// Arguments of `docker compose up` for a project.
pub(crate) fn compose_up_args(spec: &ProjectSpec) -> Vec<String> {
    let mut args = vec![
        "compose".to_string(),
        "-f".to_string(),
        spec.compose_file.to_string_lossy().into_owned(),
        "-p".to_string(),
        spec.project.clone(),
        "up".to_string(),
        "-d".to_string(),
    ];
    if spec.build {
        args.push("--build".to_string());
    }
    args.push("--force-recreate".to_string());
    args
}

/// Arguments of `docker compose down` for a project.
///
/// Works from the project label alone, so no compose file is needed.
pub(crate) fn compose_down_args(project: &str) -> Vec<String> {
    ["compose", "-p", project, "down", "--volumes", "--remove-orphans"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Run the docker CLI to completion.
///
/// The child is killed if the returned future is dropped, so a timed out
/// `up` cannot keep creating containers behind the caller's back.
async fn docker_cli(
    working_dir: Option<&std::path::Path>,
    args: &[String],
) -> Result<(), ContainerError> {
    let mut cmd = tokio::process::Command::new("docker");
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ContainerError::Compose(format!(
            "docker {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(())
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn start_project(&self, spec: &ProjectSpec) -> Result<(), ContainerError> {
        debug!("Starting compose project {}", spec.project);
        docker_cli(Some(&spec.working_dir), &compose_up_args(spec)).await
    }

    async fn remove_project(&self, project: &str) -> Result<(), ContainerError> {
        debug!("Removing compose project {}", project);
        docker_cli(None, &compose_down_args(project)).await
    }

    async fn list_containers(&self, project: &str) -> Result<Vec<ContainerHandle>, ContainerError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: Self::project_filter(project),
            ..Default::default()
        };

        let mut handles: Vec<ContainerHandle> = self
            .docker
            .list_containers(Some(options))
            .await?
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                let service = summary
                    .labels
                    .and_then(|labels| labels.get(SERVICE_LABEL).cloned())
                    .unwrap_or_else(|| name.clone());
                Some(ContainerHandle { id, name, service })
            })
            .collect();

        handles.sort_by(|a, b| (&a.service, &a.name).cmp(&(&b.service, &b.name)));
        Ok(handles)
    }

    async fn exec(
        &self,
        container: &ContainerHandle,
        cmd: Vec<String>,
    ) -> Result<ExecResult, ContainerError> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            privileged: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(&container.id, exec_options).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(msg) = output.next().await {
                match msg? {
                    LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(ExecResult {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn logs(&self, container: &ContainerHandle) -> Result<String, ContainerError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut log_stream = self.docker.logs(&container.id, Some(options));
        let mut logs = String::new();

        while let Some(log_output) = log_stream.next().await {
            logs.push_str(&log_output?.to_string());
        }

        Ok(logs)
    }

    async fn stats(&self, container: &ContainerHandle) -> Result<StatsSample, ContainerError> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = self.docker.stats(&container.id, Some(options));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| ContainerError::NotFound(format!("no stats for {}", container.name)))??;

        let net_bytes: u64 = stats
            .networks
            .as_ref()
            .map(|nets| nets.values().map(|n| n.rx_bytes + n.tx_bytes).sum())
            .unwrap_or(0);

        Ok(StatsSample {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
            net_bytes,
        })
    }

    async fn stop_container(
        &self,
        container: &ContainerHandle,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(&container.id, Some(options))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container: &ContainerHandle) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&container.id, Some(options))
            .await?;
        Ok(())
    }

    async fn list_networks(&self, project: &str) -> Result<Vec<String>, ContainerError> {
        let options = ListNetworksOptions::<String> {
            filters: Self::project_filter(project),
        };
        Ok(self
            .docker
            .list_networks(Some(options))
            .await?
            .into_iter()
            .filter_map(|network| network.name)
            .collect())
    }

    async fn remove_network(&self, name: &str) -> Result<(), ContainerError> {
        self.docker.remove_network(name).await?;
        Ok(())
    }
}
