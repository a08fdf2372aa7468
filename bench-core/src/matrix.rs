//! Experiment matrix plan and progress state.
//!
//! A [`MatrixPlan`] is the cross-product of revisions, profiles and
//! repetitions in a fixed order: revision-major, then profile, then
//! repetition index. Re-running the same plan visits cells in the same
//! order, which is what makes interrupted matrices resume predictably.
//!
//! [`ExperimentMatrixState`] tracks where every cell is:
//! 1. `start()` - take the next pending cell, move it to in-progress
//! 2. `complete()` / `fail()` / `skip()` - settle an in-progress cell
//! 3. `requeue()` - put an in-progress cell back at the front of pending
//!
//! The state is an owned value handed back to the caller; nothing here is
//! global, so independent matrices never interfere.

use bench_types::{CellKey, NetworkConditionProfile};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// The cells to run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixPlan {
    revisions: Vec<String>,
    profiles: Vec<NetworkConditionProfile>,
    repetitions: u32,
}

impl MatrixPlan {
    /// Build a plan. Duplicate revisions and profiles are dropped, keeping
    /// the first occurrence.
    pub fn new<R, P>(revisions: R, profiles: P, repetitions: u32) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        P: IntoIterator<Item = NetworkConditionProfile>,
    {
        let mut unique_revisions: Vec<String> = Vec::new();
        for r in revisions {
            let r = r.into();
            if !unique_revisions.contains(&r) {
                unique_revisions.push(r);
            }
        }
        let mut unique_profiles: Vec<NetworkConditionProfile> = Vec::new();
        for p in profiles {
            if !unique_profiles.contains(&p) {
                unique_profiles.push(p);
            }
        }
        Self {
            revisions: unique_revisions,
            profiles: unique_profiles,
            repetitions,
        }
    }

    /// Revisions in plan order.
    pub fn revisions(&self) -> &[String] {
        &self.revisions
    }

    /// Profiles in plan order.
    pub fn profiles(&self) -> &[NetworkConditionProfile] {
        &self.profiles
    }

    /// Repetitions per revision × profile pair.
    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.revisions.len() * self.profiles.len() * self.repetitions as usize
    }

    /// True when the plan has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cells, revision-major, then profile, then repetition.
    pub fn cells(&self) -> Vec<CellKey> {
        let mut cells = Vec::with_capacity(self.len());
        for revision in &self.revisions {
            for profile in &self.profiles {
                for repetition in 0..self.repetitions {
                    cells.push(CellKey::new(revision.clone(), *profile, repetition));
                }
            }
        }
        cells
    }
}

/// Progress of every cell in a matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentMatrixState {
    /// Cells not yet started, in execution order.
    pending: VecDeque<CellKey>,
    /// Cells currently executing.
    in_progress: BTreeSet<CellKey>,
    /// Cells that ran successfully in this invocation.
    completed: BTreeSet<CellKey>,
    /// Cells that ran and failed, with the failure reason.
    failed: BTreeMap<CellKey, String>,
    /// Cells not run because a record already existed.
    skipped: BTreeSet<CellKey>,
    /// Non-fatal warnings per cell.
    warnings: BTreeMap<CellKey, Vec<String>>,
}

impl ExperimentMatrixState {
    /// State with every cell of the plan pending.
    pub fn from_plan(plan: &MatrixPlan) -> Self {
        Self {
            pending: plan.cells().into(),
            ..Self::default()
        }
    }

    /// Move the next pending cell to in-progress.
    pub fn start(&mut self) -> Option<CellKey> {
        let key = self.pending.pop_front()?;
        self.in_progress.insert(key.clone());
        Some(key)
    }

    /// Start up to `n` cells at once, in order.
    pub fn start_batch(&mut self, n: usize) -> Vec<CellKey> {
        let mut batch = Vec::with_capacity(n);
        while batch.len() < n {
            match self.start() {
                Some(key) => batch.push(key),
                None => break,
            }
        }
        batch
    }

    /// Mark an in-progress cell as successfully completed.
    ///
    /// Returns false if the cell was not in progress.
    pub fn complete(&mut self, key: &CellKey) -> bool {
        if !self.in_progress.remove(key) {
            return false;
        }
        self.completed.insert(key.clone());
        true
    }

    /// Mark an in-progress cell as failed.
    ///
    /// Returns false if the cell was not in progress.
    pub fn fail(&mut self, key: &CellKey, reason: impl Into<String>) -> bool {
        if !self.in_progress.remove(key) {
            return false;
        }
        self.failed.insert(key.clone(), reason.into());
        true
    }

    /// Mark an in-progress cell as skipped (already recorded).
    ///
    /// Returns false if the cell was not in progress.
    pub fn skip(&mut self, key: &CellKey) -> bool {
        if !self.in_progress.remove(key) {
            return false;
        }
        self.skipped.insert(key.clone());
        true
    }

    /// Return an in-progress cell to the front of the pending queue.
    ///
    /// Requeued cells keep their relative order when called in reverse
    /// start order. Returns false if the cell was not in progress.
    pub fn requeue(&mut self, key: &CellKey) -> bool {
        if !self.in_progress.remove(key) {
            return false;
        }
        self.pending.push_front(key.clone());
        true
    }

    /// Attach non-fatal warnings to a cell.
    pub fn add_warnings(&mut self, key: &CellKey, warnings: impl IntoIterator<Item = String>) {
        let mut warnings = warnings.into_iter().peekable();
        if warnings.peek().is_none() {
            return;
        }
        self.warnings.entry(key.clone()).or_default().extend(warnings);
    }

    /// Cells not yet started, in execution order.
    pub fn pending(&self) -> impl Iterator<Item = &CellKey> {
        self.pending.iter()
    }

    /// Cells currently executing.
    pub fn in_progress(&self) -> &BTreeSet<CellKey> {
        &self.in_progress
    }

    /// Cells completed successfully.
    pub fn completed(&self) -> &BTreeSet<CellKey> {
        &self.completed
    }

    /// Failed cells and their reasons.
    pub fn failed(&self) -> &BTreeMap<CellKey, String> {
        &self.failed
    }

    /// Cells skipped because a record already existed.
    pub fn skipped(&self) -> &BTreeSet<CellKey> {
        &self.skipped
    }

    /// Warnings per cell.
    pub fn warnings(&self) -> &BTreeMap<CellKey, Vec<String>> {
        &self.warnings
    }

    /// Number of pending cells.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cells attempted in this invocation (completed + failed).
    pub fn attempted_count(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    /// True when no cell is pending or in progress.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.in_progress.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(label: &str) -> NetworkConditionProfile {
        label.parse().unwrap()
    }

    fn plan() -> MatrixPlan {
        MatrixPlan::new(
            ["v1", "v2"],
            [profile("10Mbps-50ms-0-60s"), profile("1Mbps-100ms-0.01-60s")],
            2,
        )
    }

    #[test]
    fn cells_are_revision_major() {
        let cells = plan().cells();
        assert_eq!(cells.len(), 8);
        assert_eq!(cells[0], CellKey::new("v1", profile("10Mbps-50ms-0-60s"), 0));
        assert_eq!(cells[1], CellKey::new("v1", profile("10Mbps-50ms-0-60s"), 1));
        assert_eq!(cells[2], CellKey::new("v1", profile("1Mbps-100ms-0.01-60s"), 0));
        assert_eq!(cells[4].revision, "v2");
    }

    #[test]
    fn duplicates_are_dropped() {
        let p = profile("10Mbps-50ms-0-60s");
        let plan = MatrixPlan::new(["v1", "v1", "v2"], [p, p], 1);
        assert_eq!(plan.revisions(), &["v1".to_string(), "v2".to_string()]);
        assert_eq!(plan.profiles().len(), 1);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn zero_repetitions_is_empty() {
        let plan = MatrixPlan::new(["v1"], [profile("10Mbps-50ms-0-60s")], 0);
        assert!(plan.is_empty());
        assert!(ExperimentMatrixState::from_plan(&plan).is_finished());
    }

    #[test]
    fn transitions_settle_every_cell() {
        let mut state = ExperimentMatrixState::from_plan(&plan());
        let a = state.start().unwrap();
        let b = state.start().unwrap();
        let c = state.start().unwrap();
        assert_eq!(state.in_progress().len(), 3);

        assert!(state.complete(&a));
        assert!(state.fail(&b, "timeout"));
        assert!(state.skip(&c));
        assert!(!state.complete(&a));

        assert_eq!(state.completed().len(), 1);
        assert_eq!(state.failed()[&b], "timeout");
        assert_eq!(state.skipped().len(), 1);
        assert_eq!(state.attempted_count(), 2);
        assert_eq!(state.pending_count(), 5);
        assert!(!state.is_finished());

        while let Some(k) = state.start() {
            state.complete(&k);
        }
        assert!(state.is_finished());
    }

    #[test]
    fn requeue_restores_order() {
        let mut state = ExperimentMatrixState::from_plan(&plan());
        let batch = state.start_batch(2);
        assert_eq!(batch.len(), 2);
        for key in batch.iter().rev() {
            assert!(state.requeue(key));
        }
        assert_eq!(state.start_batch(2), batch);
    }

    #[test]
    fn empty_warnings_are_not_recorded() {
        let mut state = ExperimentMatrixState::from_plan(&plan());
        let key = state.start().unwrap();
        state.add_warnings(&key, Vec::new());
        assert!(state.warnings().is_empty());
        state.add_warnings(&key, vec!["stop failed".to_string()]);
        assert_eq!(state.warnings()[&key], vec!["stop failed".to_string()]);
    }
}
