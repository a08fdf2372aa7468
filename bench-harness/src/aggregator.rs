//! Results aggregator.
//!
//! Reads the run record store and hands the records to
//! [`bench_core::summarize`]. Files the store cannot use are reported next
//! to the summaries rather than failing the whole aggregation.

use crate::error::StoreError;
use crate::store::{LoadIssue, RunStore};
use bench_core::{summarize, GroupField, GroupKey, SummaryRecord};
use bench_types::RunRecord;
use tracing::info;

/// Summaries plus everything needed to explain them.
#[derive(Debug, Clone, Default)]
pub struct AggregateReport {
    /// One summary per group, ordered by group key.
    pub summaries: Vec<SummaryRecord>,
    /// Store files that were skipped.
    pub issues: Vec<LoadIssue>,
    /// The records the summaries were computed from.
    pub records: Vec<RunRecord>,
}

/// Computes summaries from a [`RunStore`].
#[derive(Debug, Clone)]
pub struct Aggregator {
    store: RunStore,
}

impl Aggregator {
    /// Aggregate over `store`.
    pub fn new(store: RunStore) -> Self {
        Self { store }
    }

    /// Group every stored record by `group_by`.
    ///
    /// Groups in `requested` appear even when no record falls into them.
    pub fn summarize(
        &self,
        group_by: &[GroupField],
        requested: &[GroupKey],
    ) -> Result<AggregateReport, StoreError> {
        let loaded = self.store.load_all()?;
        let summaries = summarize(&loaded.records, group_by, requested);
        info!(
            "Summarized {} record(s) into {} group(s), {} file(s) skipped",
            loaded.records.len(),
            summaries.len(),
            loaded.issues.len()
        );
        Ok(AggregateReport {
            summaries,
            issues: loaded.issues,
            records: loaded.records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_types::{CellKey, FailureReason, NetworkConditionProfile, RunOutcome};

    fn profile() -> NetworkConditionProfile {
        "10Mbps-50ms-0-60s".parse().unwrap()
    }

    #[test]
    fn empty_requested_group_has_zero_success_rate() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = Aggregator::new(RunStore::new(dir.path()));

        let report = aggregator
            .summarize(
                &[GroupField::Revision, GroupField::Profile],
                &[GroupKey::new("v3", profile())],
            )
            .unwrap();
        assert_eq!(report.summaries.len(), 1);
        assert_eq!(report.summaries[0].count, 0);
        assert_eq!(report.summaries[0].success_rate, 0.0);
        assert!(report.summaries[0].statistics.is_empty());
    }

    #[test]
    fn malformed_files_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let key = CellKey::new("v1", profile(), 0);
        let mut ok = RunRecord::new(&key, RunOutcome::Success);
        ok.metrics.extend_samples("latency", [0.1, 0.3]);
        store.append(&ok).unwrap();
        store
            .append(&RunRecord::failed(
                &CellKey::new("v1", profile(), 1),
                FailureReason::Timeout,
                "slow",
            ))
            .unwrap();
        std::fs::write(store.dataset_dir(&profile()).join("v1@2.json"), b"[]").unwrap();

        let report = Aggregator::new(store)
            .summarize(&[GroupField::Profile], &[])
            .unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.summaries.len(), 1);
        let summary = &report.summaries[0];
        assert_eq!(summary.count, 2);
        assert_eq!(summary.success_rate, 0.5);
        assert_eq!(summary.failures_by_reason[&FailureReason::Timeout], 1);
        assert_eq!(summary.statistics["latency"].count, 2);
    }
}
