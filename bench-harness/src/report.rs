//! Report dataset handed to renderers.
//!
//! Drawing charts is someone else's job: a [`ReportRenderer`] receives a
//! [`ReportDataset`] (summaries plus a per-profile revision comparison)
//! and turns it into artifacts. [`JsonReportWriter`] is the built-in
//! renderer; it drops a `summary.json` into every dataset directory for
//! plotting tools to pick up.

use crate::error::ReportError;
use crate::store::LoadIssue;
use bench_core::{summarize, GroupField, SummaryRecord};
use bench_types::{metric_names, NetworkConditionProfile, RunRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// File name of the per-dataset summary written by [`JsonReportWriter`].
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// One revision's numbers under one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    /// Revision identifier.
    pub revision: String,
    /// Attempted runs.
    pub runs: usize,
    /// Successful runs / attempted runs.
    pub success_rate: f64,
    /// Median latency (s).
    pub latency_p50: Option<f64>,
    /// 80th percentile latency (s).
    pub latency_p80: Option<f64>,
    /// 90th percentile latency (s).
    pub latency_p90: Option<f64>,
    /// 95th percentile latency (s).
    pub latency_p95: Option<f64>,
    /// Mean successful requests per second.
    pub mean_throughput_rps: Option<f64>,
    /// Mean CPU share.
    pub mean_cpu: Option<f64>,
    /// Mean memory share.
    pub mean_memory: Option<f64>,
    /// Mean network rate (kbit/s).
    pub mean_net_kbps: Option<f64>,
}

impl ComparisonRow {
    /// Row from a revision x profile summary.
    pub fn from_summary(summary: &SummaryRecord) -> Self {
        let stat = |name: &str| summary.statistics.get(name);
        let latency = stat(metric_names::LATENCY);
        Self {
            revision: summary.group.revision.clone().unwrap_or_default(),
            runs: summary.count,
            success_rate: summary.success_rate,
            latency_p50: latency.map(|s| s.median),
            latency_p80: latency.map(|s| s.p80),
            latency_p90: latency.map(|s| s.p90),
            latency_p95: latency.map(|s| s.p95),
            mean_throughput_rps: stat(metric_names::THROUGHPUT_RPS).map(|s| s.mean),
            mean_cpu: stat(metric_names::CPU_USAGE).map(|s| s.mean),
            mean_memory: stat(metric_names::MEMORY_USAGE).map(|s| s.mean),
            mean_net_kbps: stat(metric_names::NET_KBPS).map(|s| s.mean),
        }
    }
}

/// Every revision's row for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    /// The profile.
    pub profile: NetworkConditionProfile,
    /// Dataset directory name (`data-<label>`).
    pub dataset: String,
    /// One row per revision, ordered by revision.
    pub rows: Vec<ComparisonRow>,
}

/// What a renderer gets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDataset {
    /// Summaries per revision x profile.
    pub summaries: Vec<SummaryRecord>,
    /// Comparison tables, one per profile.
    pub profiles: Vec<ProfileReport>,
    /// Store files that were skipped, for the report footer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl ReportDataset {
    /// Build the dataset from raw records.
    pub fn from_records(records: &[RunRecord], issues: &[LoadIssue]) -> Self {
        let summaries = summarize(records, &[GroupField::Revision, GroupField::Profile], &[]);

        let mut profiles: Vec<ProfileReport> = Vec::new();
        for summary in &summaries {
            let Some(profile) = summary.group.profile else {
                continue;
            };
            let row = ComparisonRow::from_summary(summary);
            match profiles.iter_mut().find(|p| p.profile == profile) {
                Some(report) => report.rows.push(row),
                None => profiles.push(ProfileReport {
                    profile,
                    dataset: profile.dataset_dir_name(),
                    rows: vec![row],
                }),
            }
        }
        profiles.sort_by_key(|p| p.profile);
        for report in &mut profiles {
            report.rows.sort_by(|a, b| a.revision.cmp(&b.revision));
        }

        Self {
            summaries,
            profiles,
            issues: issues.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Turns a report dataset into artifacts.
pub trait ReportRenderer {
    /// Render, returning the paths written.
    fn render(&self, dataset: &ReportDataset) -> Result<Vec<PathBuf>, ReportError>;
}

/// Writes `summary.json` into each dataset directory.
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    root: PathBuf,
}

impl JsonReportWriter {
    /// Write under the results directory `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ReportRenderer for JsonReportWriter {
    fn render(&self, dataset: &ReportDataset) -> Result<Vec<PathBuf>, ReportError> {
        let mut written = Vec::with_capacity(dataset.profiles.len());
        for report in &dataset.profiles {
            let dir = self.root.join(&report.dataset);
            fs::create_dir_all(&dir).map_err(|source| ReportError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = dir.join(SUMMARY_FILE_NAME);
            let json = serde_json::to_vec_pretty(report)?;
            fs::write(&path, json).map_err(|source| ReportError::Io {
                path: path.clone(),
                source,
            })?;
            info!("Wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}
