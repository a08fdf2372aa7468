//! # wanbench
//!
//! Runs benchmark matrices of revisions x network profiles and summarizes
//! the results.
//!
//! ## Commands
//!
//! - `run`: Execute the matrix (cells with a stored record are skipped)
//! - `plan`: Show the cells in execution order and which are recorded
//! - `summarize`: Aggregate stored records and write `summary.json` files
//! - `status`: List datasets with record counts
//!
//! ## Example
//!
//! ```bash
//! # Two revisions under a 10 Mbit/s, 50 ms link, three repetitions each
//! wanbench run --revision main --revision fast-path \
//!     --profile 10Mbps-50ms-0-60s --repetitions 3
//!
//! # Compare them
//! wanbench summarize
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{plan, run, status, summarize, Overrides};

/// Network-impairment benchmark harness.
#[derive(Parser, Debug)]
#[command(name = "wanbench")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = commands::DEFAULT_CONFIG)]
    config: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute the experiment matrix
    Run {
        /// Simulate containers, tc and the workload instead of using Docker
        #[arg(long)]
        mock: bool,
    },

    /// Show the cells in execution order
    Plan,

    /// Aggregate stored records
    Summarize {
        /// Fields to group by (revision, profile)
        #[arg(long, value_delimiter = ',', default_value = "revision,profile", value_parser = summarize::parse_group_field)]
        group_by: Vec<bench_core::GroupField>,

        /// Print summaries as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Do not write summary.json files
        #[arg(long)]
        no_write: bool,
    },

    /// List datasets and their record counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(&cli.config, &cli.overrides)?;

    match cli.command {
        Commands::Run { mock } => {
            run::run(&config, mock).await?;
        }
        Commands::Plan => {
            plan::run(&config).await?;
        }
        Commands::Summarize {
            group_by,
            json,
            no_write,
        } => {
            summarize::run(&config, &group_by, json, !no_write)?;
        }
        Commands::Status => {
            status::run(&config)?;
        }
    }

    Ok(())
}
