//! Aggregate stored records.

use anyhow::{Context, Result};
use bench_core::{GroupField, GroupKey, SummaryRecord};
use bench_harness::{Aggregator, BenchConfig, JsonReportWriter, ReportDataset, ReportRenderer, RunStore};
use bench_types::metric_names;

/// Parse a `--group-by` value.
pub fn parse_group_field(s: &str) -> Result<GroupField, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "revision" => Ok(GroupField::Revision),
        "profile" => Ok(GroupField::Profile),
        other => Err(format!(
            "unknown group field '{}' (expected revision or profile)",
            other
        )),
    }
}

/// Run the summarize command.
pub fn run(config: &BenchConfig, group_by: &[GroupField], json: bool, write: bool) -> Result<()> {
    let results_dir = &config.experiment.results_dir;
    let aggregator = Aggregator::new(RunStore::new(results_dir));
    let report = aggregator
        .summarize(group_by, &requested_groups(config, group_by))
        .with_context(|| format!("Failed to read results from {}", results_dir.display()))?;

    for issue in &report.issues {
        eprintln!("skipped {}", issue);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report.summaries)?);
    } else {
        print_table(&report.summaries);
    }

    if write && !report.records.is_empty() {
        let dataset = ReportDataset::from_records(&report.records, &report.issues);
        JsonReportWriter::new(results_dir)
            .render(&dataset)
            .context("Failed to write summary files")?;
    }
    Ok(())
}

/// Configured revision x profile groups, so cells without records still show.
fn requested_groups(config: &BenchConfig, group_by: &[GroupField]) -> Vec<GroupKey> {
    let by_revision = group_by.contains(&GroupField::Revision);
    let by_profile = group_by.contains(&GroupField::Profile);
    let revisions = &config.experiment.revisions;

    match (by_revision, by_profile) {
        (true, true) => revisions
            .iter()
            .flat_map(|r| config.profiles.iter().map(move |p| GroupKey::new(r.as_str(), *p)))
            .collect(),
        (true, false) => revisions.iter().map(|r| GroupKey::revision(r.as_str())).collect(),
        (false, true) => config.profiles.iter().map(|p| GroupKey::profile(*p)).collect(),
        (false, false) => Vec::new(),
    }
}

fn print_table(summaries: &[SummaryRecord]) {
    if summaries.is_empty() {
        println!("No records.");
        return;
    }
    println!(
        "{:<40} {:>5} {:>8} {:>9} {:>9} {:>9}",
        "GROUP", "RUNS", "SUCCESS", "P50 (s)", "P95 (s)", "REQ/S"
    );
    for s in summaries {
        let latency = s.statistics.get(metric_names::LATENCY);
        let rps = s.statistics.get(metric_names::THROUGHPUT_RPS);
        println!(
            "{:<40} {:>5} {:>7.0}% {:>9} {:>9} {:>9}",
            s.group.to_string(),
            s.count,
            s.success_rate * 100.0,
            fmt_opt(latency.map(|l| l.median)),
            fmt_opt(latency.map(|l| l.p95)),
            fmt_opt(rps.map(|r| r.mean)),
        );
        for (reason, n) in &s.failures_by_reason {
            println!("    {} x {}", n, reason);
        }
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v))
}
