//! Show what the results directory holds.

use anyhow::{Context, Result};
use bench_harness::{BenchConfig, LoadedRecords, RunStore};
use std::collections::BTreeSet;

/// Run the status command.
pub fn run(config: &BenchConfig) -> Result<()> {
    let store = RunStore::new(&config.experiment.results_dir);
    println!("=== wanbench status ===");
    println!();
    println!("Results: {}", store.root().display());

    let datasets = store
        .datasets()
        .with_context(|| format!("Failed to list {}", store.root().display()))?;
    if datasets.is_empty() {
        println!();
        println!("No datasets yet. Run 'wanbench run' to create some.");
        return Ok(());
    }

    println!();
    println!(
        "{:<36} {:>7} {:>7} {:>7}  REVISIONS",
        "DATASET", "RECORDS", "OK", "FAILED"
    );
    let mut issues = 0;
    for (profile, dir) in &datasets {
        let loaded = store.load_dataset(profile)?;
        issues += loaded.issues.len();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| profile.dataset_dir_name());
        println!("{}", dataset_line(&name, &loaded));
    }
    if issues > 0 {
        println!();
        println!("{} file(s) could not be read; see 'wanbench summarize'", issues);
    }
    Ok(())
}

fn dataset_line(name: &str, loaded: &LoadedRecords) -> String {
    let ok = loaded.records.iter().filter(|r| r.is_success()).count();
    let revisions: BTreeSet<&str> = loaded.records.iter().map(|r| r.revision.as_str()).collect();
    format!(
        "{:<36} {:>7} {:>7} {:>7}  {}",
        name,
        loaded.records.len(),
        ok,
        loaded.records.len() - ok,
        revisions.into_iter().collect::<Vec<_>>().join(", ")
    )
}
