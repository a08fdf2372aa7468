//! Grouping run records into summary records.
//!
//! Summaries are a pure function of the record set and the group-by
//! projection; they are never stored as ground truth.
//!
//! Groups the caller explicitly requests always appear in the output, even
//! when no record falls into them, so that a configuration that produced
//! nothing shows up with `success_rate = 0` instead of vanishing.

use crate::stats::MetricSummary;
use bench_types::{FailureReason, NetworkConditionProfile, RunRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A record field that can be grouped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupField {
    /// Group by revision identifier.
    Revision,
    /// Group by network profile.
    Profile,
}

/// Projection of a record onto the group-by fields.
///
/// Fields not grouped on are `None`. With no group-by fields every record
/// lands in the single group where both are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    /// Revision, when grouping by revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Profile, when grouping by profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<NetworkConditionProfile>,
}

impl GroupKey {
    /// Key for a revision × profile group.
    pub fn new(revision: impl Into<String>, profile: NetworkConditionProfile) -> Self {
        Self {
            revision: Some(revision.into()),
            profile: Some(profile),
        }
    }

    /// Key for a profile-only group.
    pub fn profile(profile: NetworkConditionProfile) -> Self {
        Self {
            revision: None,
            profile: Some(profile),
        }
    }

    /// Key for a revision-only group.
    pub fn revision(revision: impl Into<String>) -> Self {
        Self {
            revision: Some(revision.into()),
            profile: None,
        }
    }

    /// Project a record onto the given fields.
    pub fn project(record: &RunRecord, group_by: &[GroupField]) -> Self {
        Self {
            revision: group_by
                .contains(&GroupField::Revision)
                .then(|| record.revision.clone()),
            profile: group_by
                .contains(&GroupField::Profile)
                .then_some(record.profile),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.revision, &self.profile) {
            (Some(r), Some(p)) => write!(f, "{} @ {}", r, p),
            (Some(r), None) => write!(f, "{}", r),
            (None, Some(p)) => write!(f, "{}", p),
            (None, None) => write!(f, "all"),
        }
    }
}

/// Derived statistics for one group of run records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// The group these statistics describe.
    pub group: GroupKey,
    /// Attempted runs in the group.
    pub count: usize,
    /// Successful runs in the group.
    pub successes: usize,
    /// `successes / count`, 0 for an empty group.
    pub success_rate: f64,
    /// Failed runs per failure reason.
    #[serde(default)]
    pub failures_by_reason: BTreeMap<FailureReason, usize>,
    /// Per-metric statistics over the successful runs. Empty when none succeeded.
    #[serde(default)]
    pub statistics: BTreeMap<String, MetricSummary>,
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    successes: usize,
    failures: BTreeMap<FailureReason, usize>,
    values: BTreeMap<String, Vec<f64>>,
}

/// Group records and compute per-group summaries, ordered by group key.
///
/// Metric values are pooled across the successful records of a group:
/// a scalar contributes one value per record, a series every sample.
pub fn summarize<'a>(
    records: impl IntoIterator<Item = &'a RunRecord>,
    group_by: &[GroupField],
    requested: &[GroupKey],
) -> Vec<SummaryRecord> {
    let mut groups: BTreeMap<GroupKey, Accumulator> = requested
        .iter()
        .cloned()
        .map(|k| (k, Accumulator::default()))
        .collect();

    for record in records {
        let acc = groups.entry(GroupKey::project(record, group_by)).or_default();
        acc.count += 1;
        match record.failure_reason() {
            Some(reason) => *acc.failures.entry(reason).or_insert(0) += 1,
            None => {
                acc.successes += 1;
                for (name, value) in record.metrics.iter() {
                    acc.values
                        .entry(name.clone())
                        .or_default()
                        .extend_from_slice(value.values());
                }
            }
        }
    }

    groups
        .into_iter()
        .map(|(group, acc)| SummaryRecord {
            group,
            count: acc.count,
            successes: acc.successes,
            success_rate: if acc.count == 0 {
                0.0
            } else {
                acc.successes as f64 / acc.count as f64
            },
            failures_by_reason: acc.failures,
            statistics: acc
                .values
                .into_iter()
                .filter_map(|(name, values)| {
                    MetricSummary::from_values(values).map(|s| (name, s))
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_types::{metric_names, CellKey, RunOutcome};

    fn profile(label: &str) -> NetworkConditionProfile {
        label.parse().unwrap()
    }

    fn success(revision: &str, p: &str, rep: u32, latency: &[f64]) -> RunRecord {
        let mut r = RunRecord::new(&CellKey::new(revision, profile(p), rep), RunOutcome::Success);
        r.metrics
            .extend_samples(metric_names::LATENCY, latency.iter().copied());
        r.metrics.set_scalar(metric_names::REQUESTS_OK, latency.len() as f64);
        r
    }

    fn failure(revision: &str, p: &str, rep: u32, reason: FailureReason) -> RunRecord {
        RunRecord::failed(&CellKey::new(revision, profile(p), rep), reason, "x")
    }

    #[test]
    fn groups_by_revision_and_profile() {
        let records = vec![
            success("v1", "10Mbps-50ms-0-60s", 0, &[1.0, 2.0]),
            success("v1", "10Mbps-50ms-0-60s", 1, &[3.0, 4.0]),
            failure("v1", "10Mbps-50ms-0-60s", 2, FailureReason::Timeout),
            success("v2", "10Mbps-50ms-0-60s", 0, &[5.0]),
        ];
        let out = summarize(&records, &[GroupField::Revision, GroupField::Profile], &[]);
        assert_eq!(out.len(), 2);

        let v1 = &out[0];
        assert_eq!(v1.group, GroupKey::new("v1", profile("10Mbps-50ms-0-60s")));
        assert_eq!(v1.count, 3);
        assert_eq!(v1.successes, 2);
        assert!((v1.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(v1.failures_by_reason[&FailureReason::Timeout], 1);

        let latency = v1.statistics[metric_names::LATENCY];
        assert_eq!(latency.count, 4);
        assert_eq!(latency.median, 2.5);
        let ok = v1.statistics[metric_names::REQUESTS_OK];
        assert_eq!(ok.count, 2);
        assert_eq!(ok.mean, 2.0);
    }

    #[test]
    fn profile_grouping_pools_revisions() {
        let records = vec![
            success("v1", "10Mbps-50ms-0-60s", 0, &[1.0]),
            success("v2", "10Mbps-50ms-0-60s", 0, &[3.0]),
            success("v2", "1Mbps-50ms-0-60s", 0, &[9.0]),
        ];
        let out = summarize(&records, &[GroupField::Profile], &[]);
        assert_eq!(out.len(), 2);
        let ten = out
            .iter()
            .find(|s| s.group == GroupKey::profile(profile("10Mbps-50ms-0-60s")))
            .unwrap();
        assert_eq!(ten.count, 2);
        assert_eq!(ten.statistics[metric_names::LATENCY].mean, 2.0);
    }

    #[test]
    fn requested_empty_group_reports_zero_success_rate() {
        let wanted = GroupKey::new("v9", profile("1Mbps-200ms-0.05-30s"));
        let out = summarize(
            std::iter::empty(),
            &[GroupField::Revision, GroupField::Profile],
            std::slice::from_ref(&wanted),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].group, wanted);
        assert_eq!(out[0].count, 0);
        assert_eq!(out[0].success_rate, 0.0);
        assert!(out[0].statistics.is_empty());
    }

    #[test]
    fn all_failed_group_is_kept_without_statistics() {
        let records = vec![
            failure("v3", "10Mbps-50ms-0-60s", 0, FailureReason::Provision),
            failure("v3", "10Mbps-50ms-0-60s", 1, FailureReason::Provision),
        ];
        let out = summarize(&records, &[GroupField::Revision], &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].success_rate, 0.0);
        assert_eq!(out[0].failures_by_reason[&FailureReason::Provision], 2);
        assert!(out[0].statistics.is_empty());
    }

    #[test]
    fn no_group_fields_yields_single_group() {
        let records = vec![
            success("v1", "10Mbps-50ms-0-60s", 0, &[1.0]),
            success("v2", "1Mbps-50ms-0-60s", 0, &[2.0]),
        ];
        let out = summarize(&records, &[], &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].group.to_string(), "all");
        assert_eq!(out[0].count, 2);
    }

    #[test]
    fn summary_serializes_reasons_as_names() {
        let records = vec![failure("v1", "10Mbps-50ms-0-60s", 0, FailureReason::Workload)];
        let out = summarize(&records, &[GroupField::Revision], &[]);
        let json = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(json["failures_by_reason"]["workload"], 1);
        assert_eq!(json["group"]["revision"], "v1");
        assert!(json["group"].get("profile").is_none());
    }
}
