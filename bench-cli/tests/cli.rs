//! Command-line tests for the `wanbench` binary.

use assert_cmd::Command;
use bench_harness::RunStore;
use bench_types::{CellKey, FailureReason, NetworkConditionProfile, RunOutcome, RunRecord};
use predicates::prelude::*;
use std::path::Path;

fn wanbench(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("wanbench").unwrap();
    cmd.current_dir(dir).env("RUST_LOG", "warn");
    cmd
}

fn profile() -> NetworkConditionProfile {
    "10Mbps-50ms-0-60s".parse().unwrap()
}

fn seed(results: &Path) {
    let store = RunStore::new(results);
    store
        .append(&RunRecord::new(&CellKey::new("v1", profile(), 0), RunOutcome::Success))
        .unwrap();
    store
        .append(&RunRecord::failed(
            &CellKey::new("v2", profile(), 0),
            FailureReason::Workload,
            "connection refused",
        ))
        .unwrap();
}

#[test]
fn help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    wanbench(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("summarize"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn explicit_missing_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    wanbench(dir.path())
        .args(["--config", "nope.toml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn status_counts_records_per_dataset() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir.path().join("results"));

    wanbench(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("data-10Mbps-50ms-0-60s"))
        .stdout(predicate::str::contains("v1, v2"));
}

#[test]
fn summarize_json_reports_success_rate_and_writes_summary() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results");
    seed(&results);

    wanbench(dir.path())
        .args(["summarize", "--json", "--group-by", "profile"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success_rate\": 0.5"))
        .stdout(predicate::str::contains("\"workload\": 1"));

    assert!(results
        .join("data-10Mbps-50ms-0-60s")
        .join(bench_harness::SUMMARY_FILE_NAME)
        .is_file());
}

#[test]
fn summarize_no_write_leaves_store_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results");
    seed(&results);

    wanbench(dir.path())
        .args(["summarize", "--no-write"])
        .assert()
        .success()
        .stdout(predicate::str::contains("GROUP"));

    assert!(!results
        .join("data-10Mbps-50ms-0-60s")
        .join(bench_harness::SUMMARY_FILE_NAME)
        .exists());
}

#[test]
fn plan_marks_recorded_cells() {
    let dir = tempfile::tempdir().unwrap();
    seed(&dir.path().join("results"));

    wanbench(dir.path())
        .args([
            "plan",
            "--revision",
            "v1",
            "--revision",
            "v3",
            "--profile",
            "10Mbps-50ms-0-60s",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("recorded  v1/"))
        .stdout(predicate::str::contains("pending   v3/"))
        .stdout(predicate::str::contains("2 cell(s): 1 recorded, 1 pending"));
}

#[test]
fn mock_run_persists_records_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("wanbench.toml"),
        r#"
profiles = ["unlimited-5ms-0-1s"]

[experiment]
revisions = ["v1"]
repetitions = 2

[workload]
warmup = "0s"
grace = "5s"

[sampler]
enabled = false
"#,
    )
    .unwrap();

    wanbench(dir.path())
        .args(["run", "--mock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed: 2"));

    let dataset = dir.path().join("results").join("data-unlimited-5ms-0-1s");
    assert!(dataset.join("v1@0.json").is_file());
    assert!(dataset.join("v1@1.json").is_file());

    wanbench(dir.path())
        .args(["run", "--mock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed: 0"))
        .stdout(predicate::str::contains("Skipped:   2"));
}
