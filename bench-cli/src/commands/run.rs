//! Execute the experiment matrix.

use anyhow::{Context, Result};
use bench_core::ExperimentMatrixState;
use bench_harness::{
    BenchConfig, ContainerBackend, ContainerTcBackend, DockerBackend, DriverConfig,
    ExecutorSettings, HttpLoadWorkload, ImpairmentController, MatrixDriver, MockContainerBackend,
    ReadinessProbe, RevisionProvider, RunExecutor, RunStore, ShutdownHandle,
    StaticRevisionProvider, StatsSampler, SyntheticWorkload, TopologyManager, Workload,
};
use bench_harness::config::TopologyConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{revision_list, revision_provider};

/// Run the run command.
pub async fn run(config: &BenchConfig, mock: bool) -> Result<()> {
    let (backend, workload, topology, revisions) = if mock {
        mock_stack(config)
    } else {
        docker_stack(config)?
    };
    let revision_ids = revision_list(config, revisions.as_ref()).await?;

    let impairment = ImpairmentController::new(Arc::new(ContainerTcBackend::new(backend.clone())))
        .with_queue_limit(config.impairment.queue_limit);
    let settings = ExecutorSettings {
        grace: config.workload.grace,
        warmup: config.workload.warmup,
        impair_roles: config.impairment.roles.clone(),
    };
    let mut executor = RunExecutor::new(
        TopologyManager::new(backend.clone(), topology),
        impairment,
        workload,
        settings,
    );
    if config.sampler.enabled {
        executor = executor.with_sampler(StatsSampler::new(backend, config.sampler.interval));
    }

    let shutdown = ShutdownHandle::new();
    let signal = shutdown.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current cell(s) and stopping");
            shutdown.shutdown();
        }
    });

    let driver = MatrixDriver::new(
        Arc::new(executor),
        RunStore::new(&config.experiment.results_dir),
        revisions,
        DriverConfig {
            parallelism: config.experiment.parallelism,
        },
        signal,
    );
    let state = driver
        .run(&revision_ids, &config.profiles, config.experiment.repetitions)
        .await;

    print_outcome(&state);

    if !state.is_finished() {
        anyhow::bail!(
            "Interrupted with {} cell(s) pending; rerun to resume",
            state.pending_count()
        );
    }
    Ok(())
}

type Stack = (
    Arc<dyn ContainerBackend>,
    Arc<dyn Workload>,
    TopologyConfig,
    Arc<dyn RevisionProvider>,
);

fn docker_stack(config: &BenchConfig) -> Result<Stack> {
    let backend = DockerBackend::connect().context("Failed to connect to Docker")?;
    let workload = HttpLoadWorkload::new(config.workload.clone())
        .context("Failed to build the HTTP workload")?;
    Ok((
        Arc::new(backend),
        Arc::new(workload),
        config.topology.clone(),
        revision_provider(config),
    ))
}

fn mock_stack(config: &BenchConfig) -> Stack {
    info!("Mock mode: containers, tc and requests are simulated");
    let topology = TopologyConfig {
        readiness: ReadinessProbe::Grace {
            period: Duration::ZERO,
        },
        ..config.topology.clone()
    };
    let revisions: Arc<dyn RevisionProvider> = if config.repository.paths.is_empty() {
        Arc::new(
            config
                .experiment
                .revisions
                .iter()
                .fold(StaticRevisionProvider::new(), |p, r| p.with_revision(r.as_str(), ".")),
        )
    } else {
        revision_provider(config)
    };
    (
        Arc::new(MockContainerBackend::new()),
        Arc::new(SyntheticWorkload::new(config.workload.message_length)),
        topology,
        revisions,
    )
}

fn print_outcome(state: &ExperimentMatrixState) {
    println!();
    println!("Completed: {}", state.completed().len());
    println!("Skipped:   {} (already recorded)", state.skipped().len());
    println!("Failed:    {}", state.failed().len());
    for (key, reason) in state.failed() {
        println!("  {}  {}", key, reason);
    }
    if state.pending_count() > 0 {
        println!("Pending:   {}", state.pending_count());
    }
    let warnings: usize = state.warnings().values().map(Vec::len).sum();
    if warnings > 0 {
        println!("Warnings:  {}", warnings);
        for (key, list) in state.warnings() {
            for w in list {
                println!("  {}  {}", key, w);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_stack_maps_revisions_to_working_dir() {
        let mut config = BenchConfig::default();
        config.experiment.revisions = vec!["a".into(), "b".into()];
        let (_, _, topology, revisions) = mock_stack(&config);

        assert_eq!(
            topology.readiness,
            ReadinessProbe::Grace {
                period: Duration::ZERO
            }
        );
        let mut listed = revisions.list().await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["a", "b"]);
        let descriptor = revisions.resolve("b").await.unwrap();
        assert_eq!(descriptor.source_path, std::path::PathBuf::from("."));
    }

    #[tokio::test]
    async fn mock_run_records_every_cell() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig::default();
        config.experiment.revisions = vec!["v1".into()];
        config.experiment.results_dir = dir.path().to_path_buf();
        config.experiment.repetitions = 2;
        config.profiles = vec!["unlimited-5ms-0-1s".parse().unwrap()];
        config.workload.warmup = Duration::ZERO;
        config.workload.grace = Duration::from_secs(5);
        config.sampler.enabled = false;

        run(&config, true).await.unwrap();

        let loaded = RunStore::new(dir.path()).load_all().unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert!(loaded.records.iter().all(|r| r.is_success()));
    }
}
