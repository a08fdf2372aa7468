//! CLI command implementations.

pub mod plan;
pub mod run;
pub mod status;
pub mod summarize;

use anyhow::{Context, Result};
use bench_harness::{BenchConfig, GitRevisionProvider, RevisionProvider, StaticRevisionProvider};
use bench_types::NetworkConditionProfile;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "wanbench.toml";

/// Per-invocation overrides of config file values.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Revision to benchmark (repeatable; replaces experiment.revisions)
    #[arg(long = "revision", global = true)]
    pub revisions: Vec<String>,

    /// Network profile label, e.g. 10Mbps-50ms-0.01-60s (repeatable; replaces profiles)
    #[arg(long = "profile", global = true)]
    pub profiles: Vec<NetworkConditionProfile>,

    /// Repetitions per cell
    #[arg(long, global = true)]
    pub repetitions: Option<u32>,

    /// Results directory
    #[arg(long, global = true)]
    pub results_dir: Option<PathBuf>,

    /// Cells executed at once
    #[arg(long, global = true)]
    pub parallelism: Option<usize>,
}

impl Overrides {
    fn apply(&self, config: &mut BenchConfig) {
        if !self.revisions.is_empty() {
            config.experiment.revisions = self.revisions.clone();
        }
        if !self.profiles.is_empty() {
            config.profiles = self.profiles.clone();
        }
        if let Some(n) = self.repetitions {
            config.experiment.repetitions = n;
        }
        if let Some(dir) = &self.results_dir {
            config.experiment.results_dir = dir.clone();
        }
        if let Some(n) = self.parallelism {
            config.experiment.parallelism = n;
        }
    }
}

/// Load the config file and apply overrides.
///
/// A missing default config file means built-in defaults; a missing file
/// given explicitly is an error.
pub fn load_config(path: &Path, overrides: &Overrides) -> Result<BenchConfig> {
    let mut config = if path == Path::new(DEFAULT_CONFIG) && !path.exists() {
        BenchConfig::default()
    } else {
        BenchConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
    };
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Revision provider selected by the `[repository]` section.
pub fn revision_provider(config: &BenchConfig) -> Arc<dyn RevisionProvider> {
    if config.repository.paths.is_empty() {
        Arc::new(GitRevisionProvider::new(&config.repository))
    } else {
        Arc::new(StaticRevisionProvider::from(config.repository.paths.clone()))
    }
}

/// Configured revisions, or every revision the provider knows.
pub async fn revision_list(
    config: &BenchConfig,
    provider: &dyn RevisionProvider,
) -> Result<Vec<String>> {
    if !config.experiment.revisions.is_empty() {
        return Ok(config.experiment.revisions.clone());
    }
    let revisions = provider
        .list()
        .await
        .context("No revisions configured and listing the repository failed")?;
    if revisions.is_empty() {
        anyhow::bail!("No revisions configured and the repository has none");
    }
    Ok(revisions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cwd_relative = Path::new(DEFAULT_CONFIG);
        // Only meaningful when no wanbench.toml sits in the test's cwd.
        if !cwd_relative.exists() {
            let config = load_config(cwd_relative, &Overrides::default()).unwrap();
            assert_eq!(config.experiment.repetitions, 1);
        }

        let err = load_config(&dir.path().join("absent.toml"), &Overrides::default());
        assert!(err.is_err());
    }

    #[test]
    fn overrides_replace_config_values() {
        let overrides = Overrides {
            revisions: vec!["v9".into()],
            profiles: vec!["1Mbps-10ms-0-5s".parse().unwrap()],
            repetitions: Some(4),
            results_dir: Some(PathBuf::from("/tmp/out")),
            parallelism: Some(2),
        };
        let mut config = BenchConfig::default();
        overrides.apply(&mut config);

        assert_eq!(config.experiment.revisions, vec!["v9"]);
        assert_eq!(config.profiles[0].label(), "1Mbps-10ms-0-5s");
        assert_eq!(config.experiment.repetitions, 4);
        assert_eq!(config.experiment.results_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.experiment.parallelism, 2);
    }

    #[test]
    fn zero_repetitions_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wanbench.toml");
        std::fs::write(&path, "[experiment]\n").unwrap();
        let overrides = Overrides {
            repetitions: Some(0),
            ..Overrides::default()
        };
        assert!(load_config(&path, &overrides).is_err());
    }

    #[tokio::test]
    async fn static_paths_select_static_provider() {
        let mut config = BenchConfig::default();
        config.repository.paths.insert("v1".into(), PathBuf::from("."));
        let provider = revision_provider(&config);
        assert_eq!(revision_list(&config, provider.as_ref()).await.unwrap(), vec!["v1"]);
    }
}
