//! End-to-end matrix tests against the mock container backend.
//!
//! These drive the real executor, impairment controller, topology manager
//! and store; only Docker and `tc` are simulated.

use async_trait::async_trait;
use bench_types::{metric_names, CellKey, FailureReason, NetworkConditionProfile, RevisionDescriptor, RunRecord};
use std::sync::Arc;
use std::time::Duration;
use wanbench_harness::config::TopologyConfig;
use wanbench_harness::mock::MOCK_READY_LINE;
use wanbench_harness::{
    CellRunner, ContainerTcBackend, DriverConfig, ExecutorSettings, ImpairmentController,
    MatrixDriver, MockContainerBackend, ReadinessProbe, RunExecutor, RunStore, ShutdownHandle,
    ShutdownSignal, StaticRevisionProvider, TopologyManager, Workload, WorkloadContext,
    WorkloadError,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Records a few samples and finishes immediately.
struct Quick;

#[async_trait]
impl Workload for Quick {
    async fn run(&self, ctx: WorkloadContext) -> Result<(), WorkloadError> {
        for latency in [0.11, 0.12, 0.13] {
            ctx.recorder.record(metric_names::LATENCY, latency);
            ctx.recorder.increment(metric_names::REQUESTS_OK, 1.0);
        }
        Ok(())
    }
}

/// Records two samples, then never finishes.
struct Stalls;

#[async_trait]
impl Workload for Stalls {
    async fn run(&self, ctx: WorkloadContext) -> Result<(), WorkloadError> {
        ctx.recorder.record(metric_names::LATENCY, 0.5);
        ctx.recorder.record(metric_names::LATENCY, 0.7);
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Fails for one revision, succeeds otherwise.
struct FailsFor(&'static str);

#[async_trait]
impl Workload for FailsFor {
    async fn run(&self, ctx: WorkloadContext) -> Result<(), WorkloadError> {
        if ctx.topology.revision() == self.0 {
            return Err(WorkloadError::Failed("connection refused".into()));
        }
        Quick.run(ctx).await
    }
}

fn profile(label: &str) -> NetworkConditionProfile {
    label.parse().unwrap()
}

fn executor(mock: &MockContainerBackend, workload: Arc<dyn Workload>) -> RunExecutor {
    let backend = Arc::new(mock.clone());
    let topology = TopologyConfig {
        readiness: ReadinessProbe::LogLine {
            service: "server".into(),
            pattern: MOCK_READY_LINE.into(),
        },
        startup_timeout: Duration::from_secs(30),
        ..TopologyConfig::default()
    };
    RunExecutor::new(
        TopologyManager::new(backend.clone(), topology),
        ImpairmentController::new(Arc::new(ContainerTcBackend::new(backend))),
        workload,
        ExecutorSettings {
            grace: Duration::from_secs(5),
            warmup: Duration::ZERO,
            impair_roles: Vec::new(),
        },
    )
}

fn revisions() -> Arc<StaticRevisionProvider> {
    Arc::new(
        StaticRevisionProvider::new()
            .with_revision("v1", ".")
            .with_revision("v2", ".")
            .with_revision("v3", "."),
    )
}

fn driver(runner: Arc<dyn CellRunner>, store: &RunStore, shutdown: ShutdownSignal) -> MatrixDriver {
    MatrixDriver::new(runner, store.clone(), revisions(), DriverConfig::default(), shutdown)
}

fn revs(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn two_revisions_two_repetitions_give_four_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let mock = MockContainerBackend::new();
    let driver = driver(
        Arc::new(executor(&mock, Arc::new(Quick))),
        &store,
        ShutdownSignal::never(),
    );

    let p = profile("10Mbps-50ms-0-60s");
    let state = driver.run(&revs(&["v1", "v2"]), &[p], 2).await;

    assert!(state.is_finished());
    assert_eq!(state.completed().len(), 4);
    assert!(state.failed().is_empty());

    let dataset = dir.path().join("data-10Mbps-50ms-0-60s");
    assert!(dataset.is_dir());
    let mut files: Vec<String> = std::fs::read_dir(&dataset)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["v1@0.json", "v1@1.json", "v2@0.json", "v2@1.json"]);

    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.records.len(), 4);
    for record in &loaded.records {
        assert!(record.is_success());
        assert_eq!(record.metrics.get(metric_names::LATENCY).unwrap().values().len(), 3);
    }
}

#[tokio::test]
async fn rerun_skips_recorded_cells() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let mock = MockContainerBackend::new();
    let runner: Arc<dyn CellRunner> = Arc::new(executor(&mock, Arc::new(Quick)));
    let p = profile("10Mbps-50ms-0-60s");

    let first = driver(runner.clone(), &store, ShutdownSignal::never())
        .run(&revs(&["v1"]), &[p], 2)
        .await;
    assert_eq!(first.completed().len(), 2);
    assert_eq!(mock.starts(), 2);

    let second = driver(runner, &store, ShutdownSignal::never())
        .run(&revs(&["v1", "v2"]), &[p], 2)
        .await;
    assert_eq!(second.skipped().len(), 2);
    assert_eq!(second.completed().len(), 2);
    assert!(second
        .completed()
        .iter()
        .all(|k| k.revision == "v2"));
    assert_eq!(mock.starts(), 4);
}

#[tokio::test(start_paused = true)]
async fn provision_timeout_never_touches_impairment() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let mock = MockContainerBackend::new();
    mock.set_start_delay(Duration::from_secs(600));
    let driver = driver(
        Arc::new(executor(&mock, Arc::new(Quick))),
        &store,
        ShutdownSignal::never(),
    );

    let p = profile("10Mbps-50ms-0-60s");
    let state = driver.run(&revs(&["v3"]), &[p], 1).await;

    let key = CellKey::new("v3", p, 0);
    assert!(state.failed()[&key].starts_with("provision"));
    let record = store.get(&key).unwrap().unwrap();
    assert_eq!(record.failure_reason(), Some(FailureReason::Provision));
    assert_eq!(mock.tc_calls(), 0);
    assert_eq!(mock.live_containers(), 0);
    assert_eq!(mock.project_removals(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_slow_start_requeues_without_waiting_for_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let mock = MockContainerBackend::new();
    mock.set_start_delay(Duration::from_secs(600));
    let handle = ShutdownHandle::new();
    let driver = driver(
        Arc::new(executor(&mock, Arc::new(Quick))),
        &store,
        handle.signal(),
    );

    let trigger = tokio::spawn({
        let handle = handle.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            handle.shutdown();
        }
    });

    let started = tokio::time::Instant::now();
    let p = profile("10Mbps-50ms-0-60s");
    let state = driver.run(&revs(&["v1"]), &[p], 1).await;
    trigger.await.unwrap();

    // Well short of the 30s startup timeout.
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!state.is_finished());
    assert_eq!(state.attempted_count(), 0);
    assert_eq!(state.pending().count(), 1);
    assert!(store.load_all().unwrap().records.is_empty());
    assert_eq!(mock.tc_calls(), 0);
    assert_eq!(mock.live_containers(), 0);
    assert_eq!(mock.live_networks(), 0);
}

#[tokio::test(start_paused = true)]
async fn workload_timeout_keeps_partial_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let mock = MockContainerBackend::new();
    let driver = driver(
        Arc::new(executor(&mock, Arc::new(Stalls))),
        &store,
        ShutdownSignal::never(),
    );

    let p = profile("10Mbps-50ms-0-10s");
    driver.run(&revs(&["v1"]), &[p], 1).await;

    let record = store.get(&CellKey::new("v1", p, 0)).unwrap().unwrap();
    assert_eq!(record.failure_reason(), Some(FailureReason::Timeout));
    assert_eq!(
        record.metrics.get(metric_names::LATENCY).unwrap().values(),
        &[0.5, 0.7]
    );

    // Impairment was cleared and the topology removed after the timeout.
    assert_eq!(mock.tc_adds(), 2);
    assert_eq!(mock.tc_dels(), 2);
    assert_eq!(mock.live_containers(), 0);
    assert_eq!(mock.live_networks(), 0);
}

#[tokio::test]
async fn every_provisioned_topology_is_torn_down_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let mock = MockContainerBackend::new();
    let driver = driver(
        Arc::new(executor(&mock, Arc::new(FailsFor("v2")))),
        &store,
        ShutdownSignal::never(),
    );

    // v1 succeeds, v2's workload fails, and one v3 start fails outright.
    let p = profile("1Mbps-100ms-0.01-30s");
    driver.run(&revs(&["v1", "v2"]), &[p], 2).await;
    mock.fail_next_start("image build failed");
    mock.fail_next_tc_add("RTNETLINK answers: Operation not permitted");
    let state = driver.run(&revs(&["v3"]), &[p], 2).await;

    assert_eq!(state.failed().len(), 2);
    let loaded = store.load_all().unwrap();
    let reasons: Vec<Option<FailureReason>> =
        loaded.records.iter().map(RunRecord::failure_reason).collect();
    assert_eq!(
        reasons,
        vec![
            None,
            None,
            Some(FailureReason::Workload),
            Some(FailureReason::Workload),
            Some(FailureReason::Provision),
            Some(FailureReason::Impairment),
        ]
    );

    assert_eq!(mock.starts(), 6);
    assert_eq!(mock.teardowns(), mock.starts());
    assert_eq!(mock.live_containers(), 0);
    assert_eq!(mock.live_networks(), 0);
    assert_eq!(mock.tc_adds(), mock.tc_dels());
}

#[tokio::test]
async fn panicking_runner_is_contained() {
    struct Explodes;

    #[async_trait]
    impl CellRunner for Explodes {
        async fn run_cell(
            &self,
            _revision: &RevisionDescriptor,
            key: &CellKey,
            _shutdown: ShutdownSignal,
        ) -> RunRecord {
            if key.revision == "v1" {
                panic!("runner blew up on {}", key);
            }
            RunRecord::new(key, bench_types::RunOutcome::Success)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let state = driver(Arc::new(Explodes), &store, ShutdownSignal::never())
        .run(&revs(&["v1", "v2"]), &[profile("10Mbps-50ms-0-60s")], 1)
        .await;

    assert!(state.is_finished());
    assert_eq!(state.completed().len(), 1);
    let (key, reason) = state.failed().iter().next().unwrap();
    assert_eq!(key.revision, "v1");
    assert!(reason.starts_with("unexpected"));
    assert!(reason.contains("runner blew up"));

    let record = store.get(key).unwrap().unwrap();
    assert_eq!(record.failure_reason(), Some(FailureReason::Unexpected));
}

#[tokio::test(start_paused = true)]
async fn shutdown_requeues_in_flight_cell_after_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::new(dir.path());
    let mock = MockContainerBackend::new();
    let handle = ShutdownHandle::new();
    let driver = driver(
        Arc::new(executor(&mock, Arc::new(Stalls))),
        &store,
        handle.signal(),
    );

    let trigger = tokio::spawn({
        let handle = handle.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            handle.shutdown();
        }
    });

    let p = profile("10Mbps-50ms-0-60s");
    let state = driver.run(&revs(&["v1", "v2"]), &[p], 1).await;
    trigger.await.unwrap();

    assert!(!state.is_finished());
    assert_eq!(state.attempted_count(), 0);
    let pending: Vec<&CellKey> = state.pending().collect();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0], &CellKey::new("v1", p, 0));

    // Nothing persisted for the interrupted cell, but it was cleaned up.
    assert!(store.load_all().unwrap().records.is_empty());
    assert_eq!(mock.starts(), 1);
    assert_eq!(mock.teardowns(), 1);
    assert_eq!(mock.tc_adds(), mock.tc_dels());
    assert_eq!(mock.live_containers(), 0);
}
