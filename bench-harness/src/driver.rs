//! Experiment matrix driver.
//!
//! Walks the revision x profile x repetition cross-product in a fixed
//! order, skips cells that already have a stored record, runs the rest
//! through a [`CellRunner`] and persists every record it gets back.
//!
//! One cell can never take the matrix down: a revision that cannot be
//! resolved, a panicking runner and a failed write all end up as failed
//! cells in the returned [`ExperimentMatrixState`]. On shutdown the
//! in-flight cells finish cleaning up, go back to pending, and the driver
//! returns without starting anything new.

use crate::error::{RevisionError, UnexpectedRunError};
use crate::executor::CellRunner;
use crate::revision::RevisionProvider;
use crate::shutdown::ShutdownSignal;
use crate::store::RunStore;
use bench_core::{ExperimentMatrixState, MatrixPlan};
use bench_types::{
    CellKey, FailureReason, NetworkConditionProfile, RevisionDescriptor, RunOutcome, RunRecord,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Driver tuning.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Cells executed at once. Only safe above 1 when every topology has
    /// its own network namespaces.
    pub parallelism: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { parallelism: 1 }
    }
}

/// Runs experiment matrices.
pub struct MatrixDriver {
    runner: Arc<dyn CellRunner>,
    store: RunStore,
    revisions: Arc<dyn RevisionProvider>,
    config: DriverConfig,
    shutdown: ShutdownSignal,
}

impl MatrixDriver {
    /// Create a driver.
    pub fn new(
        runner: Arc<dyn CellRunner>,
        store: RunStore,
        revisions: Arc<dyn RevisionProvider>,
        config: DriverConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            runner,
            store,
            revisions,
            config,
            shutdown,
        }
    }

    /// Run every cell of `revisions x profiles x 0..repetitions`.
    pub async fn run(
        &self,
        revisions: &[String],
        profiles: &[NetworkConditionProfile],
        repetitions: u32,
    ) -> ExperimentMatrixState {
        let plan = MatrixPlan::new(revisions.iter().cloned(), profiles.iter().copied(), repetitions);
        self.run_plan(&plan).await
    }

    /// Run every cell of a plan.
    pub async fn run_plan(&self, plan: &MatrixPlan) -> ExperimentMatrixState {
        let mut state = ExperimentMatrixState::from_plan(plan);
        let mut resolved: HashMap<String, Result<RevisionDescriptor, String>> = HashMap::new();
        let parallelism = self.config.parallelism.max(1);

        info!(
            "Matrix: {} revision(s) x {} profile(s) x {} repetition(s) = {} cell(s)",
            plan.revisions().len(),
            plan.profiles().len(),
            plan.repetitions(),
            plan.len()
        );

        loop {
            if self.shutdown.is_triggered() {
                warn!("Shutdown requested; {} cell(s) left pending", state.pending_count());
                break;
            }

            let batch = state.start_batch(parallelism);
            if batch.is_empty() {
                break;
            }

            let mut runnable = Vec::with_capacity(batch.len());
            for key in batch {
                if self.store.contains(&key) {
                    debug!("Skipping {}: record exists", key);
                    state.skip(&key);
                    continue;
                }

                match self.resolve(&mut resolved, &key.revision).await {
                    Ok(descriptor) => runnable.push((key, descriptor)),
                    Err(detail) => {
                        let record = RunRecord::failed(&key, FailureReason::Revision, detail);
                        self.settle(&mut state, &key, record);
                    }
                }
            }

            if runnable.is_empty() {
                continue;
            }

            let tasks = runnable.iter().map(|(key, descriptor)| {
                let runner = Arc::clone(&self.runner);
                let shutdown = self.shutdown.clone();
                let key = key.clone();
                let descriptor = descriptor.clone();
                tokio::spawn(async move { runner.run_cell(&descriptor, &key, shutdown).await })
            });
            let results = futures_util::future::join_all(tasks).await;

            let mut cancelled = Vec::new();
            for ((key, descriptor), joined) in runnable.into_iter().zip(results) {
                let record = match joined {
                    Ok(record) if record.key() == key => record,
                    Ok(record) => unexpected(
                        &key,
                        UnexpectedRunError::Misattributed {
                            expected: key.to_string(),
                            returned: record.key().to_string(),
                        },
                    ),
                    Err(e) if e.is_panic() => {
                        unexpected(&key, UnexpectedRunError::Panicked(panic_message(e)))
                    }
                    Err(e) => unexpected(&key, UnexpectedRunError::Aborted(e.to_string())),
                };

                if record.failure_reason() == Some(FailureReason::Cancelled) {
                    info!("{} cancelled; returning it to pending", key);
                    state.add_warnings(&key, record.warnings);
                    cancelled.push(key);
                    continue;
                }

                let mut record = record;
                if record.commit.is_none() {
                    record.commit = descriptor.commit;
                }
                self.settle(&mut state, &key, record);
            }

            // Push back in reverse so pending keeps plan order.
            for key in cancelled.iter().rev() {
                state.requeue(key);
            }
        }

        info!(
            "Matrix finished: {} completed, {} failed, {} skipped, {} pending",
            state.completed().len(),
            state.failed().len(),
            state.skipped().len(),
            state.pending_count()
        );
        state
    }

    async fn resolve(
        &self,
        cache: &mut HashMap<String, Result<RevisionDescriptor, String>>,
        identifier: &str,
    ) -> Result<RevisionDescriptor, String> {
        if let Some(cached) = cache.get(identifier) {
            return cached.clone();
        }
        let result = self
            .revisions
            .resolve(identifier)
            .await
            .map_err(|e: RevisionError| {
                warn!("Revision {} unavailable: {}", identifier, e);
                e.to_string()
            });
        cache.insert(identifier.to_string(), result.clone());
        result
    }

    /// Persist a finished record and move its cell out of in-progress.
    fn settle(&self, state: &mut ExperimentMatrixState, key: &CellKey, record: RunRecord) {
        state.add_warnings(key, record.warnings.iter().cloned());

        if let Err(e) = self.store.append(&record) {
            warn!("Could not persist {}: {}", key, e);
            state.fail(key, format!("persist: {}", e));
            return;
        }

        match &record.outcome {
            RunOutcome::Success => {
                state.complete(key);
            }
            RunOutcome::Failure { reason, detail } => {
                state.fail(key, format!("{}: {}", reason, detail));
            }
        }
    }
}

fn unexpected(key: &CellKey, error: UnexpectedRunError) -> RunRecord {
    warn!("{}: {}", key, error);
    RunRecord::failed(key, FailureReason::Unexpected, error.to_string())
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
