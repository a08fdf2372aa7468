//! Run records and the keys that identify matrix cells.

use crate::profile::NetworkConditionProfile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Well-known metric names produced by the built-in workload and sampler.
pub mod metric_names {
    /// Per-request round-trip latency in seconds (samples).
    pub const LATENCY: &str = "latency";
    /// Requests that completed with a success status (scalar).
    pub const REQUESTS_OK: &str = "requests_ok";
    /// Requests that errored or timed out (scalar).
    pub const REQUESTS_FAILED: &str = "requests_failed";
    /// Completed requests per second over the measured window (scalar).
    pub const THROUGHPUT_RPS: &str = "throughput_rps";
    /// Container CPU usage as a fraction of host CPU (samples).
    pub const CPU_USAGE: &str = "cpu_usage";
    /// Container memory usage as a fraction of its limit (samples).
    pub const MEMORY_USAGE: &str = "memory_usage";
    /// Container network traffic rate in kilobits per second (samples).
    pub const NET_KBPS: &str = "net_kbps";
}

// ============================================================================
// Revisions and cell keys
// ============================================================================

/// A resolved build of the system under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionDescriptor {
    /// Identifier as requested by the operator (branch, tag, directory name).
    pub identifier: String,
    /// Directory containing the build context for this revision.
    pub source_path: PathBuf,
    /// Resolved commit hash, when the provider knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl RevisionDescriptor {
    /// Descriptor for a source tree without commit information.
    pub fn new(identifier: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            source_path: source_path.into(),
            commit: None,
        }
    }
}

/// Identity of one matrix cell: `(revision, profile, repetition)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    /// Revision identifier.
    pub revision: String,
    /// Network profile.
    pub profile: NetworkConditionProfile,
    /// Zero-based repetition index.
    pub repetition: u32,
}

impl CellKey {
    /// Create a new cell key.
    pub fn new(revision: impl Into<String>, profile: NetworkConditionProfile, repetition: u32) -> Self {
        Self {
            revision: revision.into(),
            profile,
            repetition,
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/#{}", self.revision, self.profile, self.repetition)
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    /// The revision could not be resolved or materialized.
    Revision,
    /// Containers could not be started or never became ready.
    Provision,
    /// Network impairment could not be applied.
    Impairment,
    /// The workload overran its deadline.
    Timeout,
    /// The workload reported an error.
    Workload,
    /// The run was interrupted by shutdown.
    Cancelled,
    /// Any other failure, including panics in the run task.
    Unexpected,
}

impl FailureReason {
    /// Stable lowercase name used in records and summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Revision => "revision",
            FailureReason::Provision => "provision",
            FailureReason::Impairment => "impairment",
            FailureReason::Timeout => "timeout",
            FailureReason::Workload => "workload",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    /// The workload completed; metrics are in the record.
    Success,
    /// The run failed.
    Failure {
        /// Failure category.
        reason: FailureReason,
        /// Human-readable detail.
        detail: String,
    },
}

impl RunOutcome {
    /// Shorthand for a failure outcome.
    pub fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        RunOutcome::Failure {
            reason,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// A single named metric: one number or a series of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Single value.
    Scalar(f64),
    /// Sample series.
    Samples(Vec<f64>),
}

impl MetricValue {
    /// All numbers held by this metric.
    pub fn values(&self) -> &[f64] {
        match self {
            MetricValue::Scalar(v) => std::slice::from_ref(v),
            MetricValue::Samples(v) => v,
        }
    }
}

/// Named metrics collected during a run, keyed in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, MetricValue>);

impl Metrics {
    /// Empty metric set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a scalar metric, replacing any previous value.
    pub fn set_scalar(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), MetricValue::Scalar(value));
    }

    /// Append samples to a series, creating it if needed.
    ///
    /// A scalar stored under the same name is turned into a series.
    pub fn extend_samples(&mut self, name: impl Into<String>, samples: impl IntoIterator<Item = f64>) {
        let entry = self
            .0
            .entry(name.into())
            .or_insert_with(|| MetricValue::Samples(Vec::new()));
        if let MetricValue::Scalar(v) = *entry {
            *entry = MetricValue::Samples(vec![v]);
        }
        if let MetricValue::Samples(series) = entry {
            series.extend(samples);
        }
    }

    /// Look up a metric.
    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.0.get(name)
    }

    /// Iterate metrics in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricValue)> {
        self.0.iter()
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no metric was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge another set into this one; series are concatenated, scalars replaced.
    pub fn merge(&mut self, other: Metrics) {
        for (name, value) in other.0 {
            match value {
                MetricValue::Scalar(v) => self.set_scalar(name, v),
                MetricValue::Samples(s) => self.extend_samples(name, s),
            }
        }
    }
}

// ============================================================================
// RunRecord
// ============================================================================

/// Persisted result of one matrix cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Revision identifier.
    pub revision: String,
    /// Resolved commit hash, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Network profile the run used.
    pub profile: NetworkConditionProfile,
    /// Zero-based repetition index.
    pub repetition: u32,
    /// Wall-clock start, milliseconds since the Unix epoch.
    pub started_at_ms: u64,
    /// Wall-clock run time in milliseconds.
    pub elapsed_ms: u64,
    /// Success or failure.
    pub outcome: RunOutcome,
    /// Collected metrics. On timeout this holds whatever was gathered.
    #[serde(default)]
    pub metrics: Metrics,
    /// Non-fatal problems, such as teardown warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunRecord {
    /// Record for a cell with an empty metric set.
    pub fn new(key: &CellKey, outcome: RunOutcome) -> Self {
        Self {
            revision: key.revision.clone(),
            commit: None,
            profile: key.profile,
            repetition: key.repetition,
            started_at_ms: 0,
            elapsed_ms: 0,
            outcome,
            metrics: Metrics::new(),
            warnings: Vec::new(),
        }
    }

    /// Failure record for a cell.
    pub fn failed(key: &CellKey, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self::new(key, RunOutcome::failure(reason, detail))
    }

    /// The cell this record belongs to.
    pub fn key(&self) -> CellKey {
        CellKey::new(self.revision.clone(), self.profile, self.repetition)
    }

    /// True when the outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Success)
    }

    /// Failure reason, if the run failed.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match &self.outcome {
            RunOutcome::Success => None,
            RunOutcome::Failure { reason, .. } => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CellKey {
        CellKey::new("main", "10Mbps-50ms-0-60s".parse().unwrap(), 1)
    }

    #[test]
    fn extend_samples_promotes_scalar() {
        let mut m = Metrics::new();
        m.set_scalar("x", 1.0);
        m.extend_samples("x", [2.0, 3.0]);
        assert_eq!(m.get("x").unwrap().values(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn merge_concatenates_series() {
        let mut a = Metrics::new();
        a.extend_samples(metric_names::LATENCY, [0.1]);
        let mut b = Metrics::new();
        b.extend_samples(metric_names::LATENCY, [0.2]);
        b.set_scalar(metric_names::REQUESTS_OK, 4.0);
        a.merge(b);
        assert_eq!(a.get(metric_names::LATENCY).unwrap().values(), &[0.1, 0.2]);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn record_key_matches_cell() {
        let record = RunRecord::failed(&key(), FailureReason::Timeout, "deadline");
        assert_eq!(record.key(), key());
        assert_eq!(record.failure_reason(), Some(FailureReason::Timeout));
        assert!(!record.is_success());
    }

    #[test]
    fn record_json_shape() {
        let mut record = RunRecord::new(&key(), RunOutcome::Success);
        record.metrics.extend_samples(metric_names::LATENCY, [0.25, 0.5]);
        record.metrics.set_scalar(metric_names::REQUESTS_OK, 2.0);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"]["status"], "success");
        assert_eq!(json["metrics"]["latency"], serde_json::json!([0.25, 0.5]));
        assert_eq!(json["metrics"]["requests_ok"], 2.0);
        assert!(json.get("warnings").is_none());

        let back: RunRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn failure_outcome_serializes_reason_lowercase() {
        let outcome = RunOutcome::failure(FailureReason::Provision, "compose up failed");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["reason"], "provision");
        assert_eq!(json["detail"], "compose up failed");
    }

    #[test]
    fn cell_keys_order_by_revision_then_profile_then_repetition() {
        let p1: NetworkConditionProfile = "10Mbps-50ms-0-60s".parse().unwrap();
        let p2: NetworkConditionProfile = "10Mbps-100ms-0-60s".parse().unwrap();
        let mut keys = vec![
            CellKey::new("b", p1, 0),
            CellKey::new("a", p2, 1),
            CellKey::new("a", p1, 1),
            CellKey::new("a", p1, 0),
        ];
        keys.sort();
        assert_eq!(keys[0], CellKey::new("a", p1, 0));
        assert_eq!(keys[1], CellKey::new("a", p1, 1));
        assert_eq!(keys[2], CellKey::new("a", p2, 1));
        assert_eq!(keys[3], CellKey::new("b", p1, 0));
    }
}
