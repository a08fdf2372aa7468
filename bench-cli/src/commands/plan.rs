//! Show the matrix in execution order.

use anyhow::Result;
use bench_core::MatrixPlan;
use bench_harness::{BenchConfig, RunStore};
use bench_types::CellKey;

use super::{revision_list, revision_provider};

/// Run the plan command.
pub async fn run(config: &BenchConfig) -> Result<()> {
    let provider = revision_provider(config);
    let revisions = revision_list(config, provider.as_ref()).await?;
    let plan = MatrixPlan::new(
        revisions,
        config.profiles.iter().copied(),
        config.experiment.repetitions,
    );
    let store = RunStore::new(&config.experiment.results_dir);

    let lines = plan_lines(&plan, |key| store.contains(key));
    for line in &lines {
        println!("{}", line);
    }
    let recorded = lines.iter().filter(|l| l.starts_with("recorded")).count();
    println!();
    println!(
        "{} cell(s): {} recorded, {} pending",
        plan.len(),
        recorded,
        plan.len() - recorded
    );
    Ok(())
}

fn plan_lines(plan: &MatrixPlan, recorded: impl Fn(&CellKey) -> bool) -> Vec<String> {
    plan.cells()
        .iter()
        .map(|key| {
            let status = if recorded(key) { "recorded" } else { "pending " };
            format!("{}  {}", status, key)
        })
        .collect()
}
