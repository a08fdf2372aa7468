//! Run executor.
//!
//! Executes one matrix cell: provision, impair, measure, clear, tear down.
//! Whatever happens inside a run ends up in the returned [`RunRecord`];
//! nothing is propagated as an error.
//!
//! ## Guarantees
//!
//! - Provisioning failure means no impairment is attempted.
//! - Shutdown during provisioning abandons the start and cleans up; the
//!   record is `cancelled`.
//! - Every provisioned topology is torn down exactly once.
//! - Every applied impairment is cleared before teardown, including after
//!   a workload failure, a timeout, or cancellation.

use crate::error::{ProvisionError, WorkloadError};
use crate::impairment::ImpairmentController;
use crate::sampler::StatsSampler;
use crate::shutdown::ShutdownSignal;
use crate::topology::{InterfaceHandle, Topology, TopologyManager};
use crate::workload::{MetricsRecorder, Workload, WorkloadContext};
use async_trait::async_trait;
use bench_types::{CellKey, FailureReason, Metrics, RevisionDescriptor, RunOutcome, RunRecord};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{info, warn};

/// Runs one matrix cell to a record.
#[async_trait]
pub trait CellRunner: Send + Sync {
    /// Run `key` against `revision`. Never fails; failures are records.
    async fn run_cell(
        &self,
        revision: &RevisionDescriptor,
        key: &CellKey,
        shutdown: ShutdownSignal,
    ) -> RunRecord;
}

/// Executor tuning.
#[derive(Debug, Clone, Default)]
pub struct ExecutorSettings {
    /// Slack on top of the test duration before the workload times out.
    pub grace: Duration,
    /// Samples recorded this soon after workload start are dropped.
    pub warmup: Duration,
    /// Roles whose interfaces are impaired; empty means every node.
    pub impair_roles: Vec<String>,
}

/// Default [`CellRunner`]: real topology, impairment and workload.
pub struct RunExecutor {
    topology: TopologyManager,
    impairment: ImpairmentController,
    workload: Arc<dyn Workload>,
    sampler: Option<StatsSampler>,
    settings: ExecutorSettings,
}

/// How the measure step ended.
enum Measured {
    Completed,
    Failed(WorkloadError),
    TimedOut(Duration),
    Cancelled,
}

impl RunExecutor {
    /// Assemble an executor.
    pub fn new(
        topology: TopologyManager,
        impairment: ImpairmentController,
        workload: Arc<dyn Workload>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            topology,
            impairment,
            workload,
            sampler: None,
            settings,
        }
    }

    /// Sample container stats while the workload runs.
    pub fn with_sampler(mut self, sampler: StatsSampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Execute one cell.
    pub async fn execute(
        &self,
        revision: &RevisionDescriptor,
        key: &CellKey,
        shutdown: ShutdownSignal,
    ) -> RunRecord {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let clock = Instant::now();

        info!(
            revision = %key.revision,
            profile = %key.profile,
            repetition = key.repetition,
            "Starting run"
        );

        let (outcome, metrics, warnings) = self.execute_inner(revision, key, shutdown).await;

        let mut record = RunRecord::new(key, outcome);
        record.commit = revision.commit.clone();
        record.started_at_ms = started_at_ms;
        record.elapsed_ms = clock.elapsed().as_millis() as u64;
        record.metrics = metrics;
        record.warnings = warnings;

        match &record.outcome {
            RunOutcome::Success => info!(
                revision = %key.revision,
                profile = %key.profile,
                repetition = key.repetition,
                metrics = record.metrics.len(),
                "Run succeeded"
            ),
            RunOutcome::Failure { reason, detail } => warn!(
                revision = %key.revision,
                profile = %key.profile,
                repetition = key.repetition,
                %reason,
                "Run failed: {}",
                detail
            ),
        }
        record
    }

    async fn execute_inner(
        &self,
        revision: &RevisionDescriptor,
        key: &CellKey,
        shutdown: ShutdownSignal,
    ) -> (RunOutcome, Metrics, Vec<String>) {
        let topology = match self.topology.provision(revision, &shutdown).await {
            Ok(topology) => topology,
            Err(e) => {
                let reason = match e {
                    ProvisionError::Cancelled { .. } => FailureReason::Cancelled,
                    _ => FailureReason::Provision,
                };
                return (
                    RunOutcome::failure(reason, e.to_string()),
                    Metrics::new(),
                    Vec::new(),
                );
            }
        };

        let mut warnings = Vec::new();
        let mut applied = Vec::new();
        let (outcome, metrics) = self
            .impair_and_measure(&topology, key, &shutdown, &mut applied)
            .await;

        for target in &applied {
            if let Err(e) = self.impairment.clear(target).await {
                warnings.push(format!("clear {}: {}", target, e));
            }
        }

        if let Err(warning) = self.topology.teardown(topology).await {
            warnings.extend(warning.failures);
        }

        (outcome, metrics, warnings)
    }

    async fn impair_and_measure(
        &self,
        topology: &Topology,
        key: &CellKey,
        shutdown: &ShutdownSignal,
        applied: &mut Vec<InterfaceHandle>,
    ) -> (RunOutcome, Metrics) {
        if shutdown.is_triggered() {
            return (
                RunOutcome::failure(FailureReason::Cancelled, "shutdown before impairment"),
                Metrics::new(),
            );
        }

        let targets = self.targets(topology);
        if targets.is_empty() {
            return (
                RunOutcome::failure(
                    FailureReason::Impairment,
                    format!("no interface to impair in {}", topology.project()),
                ),
                Metrics::new(),
            );
        }

        for target in targets {
            if let Err(e) = self.impairment.apply(&target, &key.profile).await {
                return (
                    RunOutcome::failure(FailureReason::Impairment, e.to_string()),
                    Metrics::new(),
                );
            }
            applied.push(target);
        }

        let recorder = MetricsRecorder::new(self.settings.warmup);
        let measured = self.measure(topology, key, shutdown, recorder.clone()).await;
        let metrics = recorder.snapshot();

        let outcome = match measured {
            Measured::Completed => RunOutcome::Success,
            Measured::Failed(e) => RunOutcome::failure(FailureReason::Workload, e.to_string()),
            Measured::TimedOut(after) => RunOutcome::failure(
                FailureReason::Timeout,
                WorkloadError::Timeout { after }.to_string(),
            ),
            Measured::Cancelled => {
                RunOutcome::failure(FailureReason::Cancelled, "shutdown during workload")
            }
        };
        (outcome, metrics)
    }

    async fn measure(
        &self,
        topology: &Topology,
        key: &CellKey,
        shutdown: &ShutdownSignal,
        recorder: MetricsRecorder,
    ) -> Measured {
        let duration = key.profile.test_duration();
        let deadline = duration + self.settings.grace;

        let sampler = self
            .sampler
            .as_ref()
            .map(|s| s.spawn(topology.containers(), recorder.clone()));

        let workload = Arc::clone(&self.workload);
        let ctx = WorkloadContext {
            topology: topology.clone(),
            profile: key.profile,
            duration,
            recorder,
        };
        let mut task = tokio::spawn(async move { workload.run(ctx).await });

        let measured = tokio::select! {
            joined = tokio::time::timeout(deadline, &mut task) => match joined {
                Ok(Ok(Ok(()))) => Measured::Completed,
                Ok(Ok(Err(e))) => Measured::Failed(e),
                Ok(Err(join)) => Measured::Failed(WorkloadError::Panicked(join.to_string())),
                Err(_) => {
                    task.abort();
                    Measured::TimedOut(deadline)
                }
            },
            _ = shutdown.cancelled() => {
                task.abort();
                Measured::Cancelled
            }
        };

        if let Some(sampler) = sampler {
            sampler.stop().await;
        }
        measured
    }

    fn targets(&self, topology: &Topology) -> Vec<InterfaceHandle> {
        let roles = &self.settings.impair_roles;
        topology
            .nodes()
            .iter()
            .filter(|n| roles.is_empty() || roles.contains(&n.role))
            .flat_map(|n| n.interfaces.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl CellRunner for RunExecutor {
    async fn run_cell(
        &self,
        revision: &RevisionDescriptor,
        key: &CellKey,
        shutdown: ShutdownSignal,
    ) -> RunRecord {
        self.execute(revision, key, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopologyConfig;
    use crate::impairment::ContainerTcBackend;
    use crate::mock::MockContainerBackend;
    use crate::topology::ReadinessProbe;

    struct Idle;

    #[async_trait]
    impl Workload for Idle {
        async fn run(&self, ctx: WorkloadContext) -> Result<(), WorkloadError> {
            ctx.recorder.record("latency", 0.05);
            Ok(())
        }
    }

    fn executor(mock: &MockContainerBackend, roles: &[&str]) -> RunExecutor {
        let backend = Arc::new(mock.clone());
        let config = TopologyConfig {
            readiness: ReadinessProbe::Grace {
                period: Duration::ZERO,
            },
            ..TopologyConfig::default()
        };
        RunExecutor::new(
            TopologyManager::new(backend.clone(), config),
            ImpairmentController::new(Arc::new(ContainerTcBackend::new(backend))),
            Arc::new(Idle),
            ExecutorSettings {
                grace: Duration::from_secs(1),
                warmup: Duration::ZERO,
                impair_roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        )
    }

    fn key() -> CellKey {
        CellKey::new("v1", "10Mbps-50ms-0-60s".parse().unwrap(), 0)
    }

    #[tokio::test]
    async fn successful_run_cleans_up() {
        let mock = MockContainerBackend::new();
        let exec = executor(&mock, &[]);
        let revision = RevisionDescriptor {
            commit: Some("abc123".into()),
            ..RevisionDescriptor::new("v1", "/src/v1")
        };

        let record = exec.execute(&revision, &key(), ShutdownSignal::never()).await;
        assert!(record.is_success(), "{:?}", record.outcome);
        assert_eq!(record.commit.as_deref(), Some("abc123"));
        assert!(record.metrics.get("latency").is_some());
        assert_eq!(mock.tc_adds(), 2);
        assert_eq!(mock.live_containers(), 0);
        assert_eq!(mock.teardowns(), 1);
    }

    #[tokio::test]
    async fn roles_restrict_targets() {
        let mock = MockContainerBackend::new();
        let exec = executor(&mock, &["client"]);
        let record = exec
            .execute(&RevisionDescriptor::new("v1", "."), &key(), ShutdownSignal::never())
            .await;
        assert!(record.is_success());
        assert_eq!(mock.tc_adds(), 1);
    }

    #[tokio::test]
    async fn unknown_role_is_an_impairment_failure() {
        let mock = MockContainerBackend::new();
        let exec = executor(&mock, &["router"]);
        let record = exec
            .execute(&RevisionDescriptor::new("v1", "."), &key(), ShutdownSignal::never())
            .await;
        assert_eq!(record.failure_reason(), Some(FailureReason::Impairment));
        assert_eq!(mock.teardowns(), 1);
    }

    #[tokio::test]
    async fn teardown_problems_become_warnings() {
        let mock = MockContainerBackend::new();
        mock.fail_stop("server");
        let exec = executor(&mock, &[]);
        let record = exec
            .execute(&RevisionDescriptor::new("v1", "."), &key(), ShutdownSignal::never())
            .await;
        assert!(record.is_success());
        assert_eq!(record.warnings.len(), 1);
        assert!(record.warnings[0].contains("stop"));
    }

    #[tokio::test]
    async fn failed_start_takes_the_project_down() {
        let mock = MockContainerBackend::new();
        mock.fail_next_start("pull access denied");
        let exec = executor(&mock, &[]);
        let record = exec
            .execute(&RevisionDescriptor::new("v1", "."), &key(), ShutdownSignal::never())
            .await;
        assert_eq!(record.failure_reason(), Some(FailureReason::Provision));
        assert_eq!(mock.project_removals(), 1);
        assert_eq!(mock.live_containers(), 0);
        assert_eq!(mock.live_networks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_starting_cancels_promptly() {
        let mock = MockContainerBackend::new();
        mock.set_start_delay(Duration::from_secs(600));
        let exec = executor(&mock, &[]);
        let handle = crate::shutdown::ShutdownHandle::new();

        let trigger = tokio::spawn({
            let handle = handle.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                handle.shutdown();
            }
        });
        let record = exec
            .execute(&RevisionDescriptor::new("v1", "."), &key(), handle.signal())
            .await;
        trigger.await.unwrap();

        assert_eq!(record.failure_reason(), Some(FailureReason::Cancelled));
        assert!(record.elapsed_ms < 10_000, "took {}ms", record.elapsed_ms);
        assert_eq!(mock.tc_calls(), 0);
        assert_eq!(mock.project_removals(), 1);
        assert_eq!(mock.live_containers(), 0);
    }
}
