//! Configuration loading for wanbench.
//!
//! Configuration is loaded from a TOML file (default: `wanbench.toml`).
//! Every section is optional; missing keys take the defaults below.

use crate::topology::{ReadinessProbe, DEFAULT_READY_LINE};
use bench_types::{duration_str, NetworkConditionProfile};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BenchConfig {
    /// Matrix configuration.
    #[serde(default)]
    pub experiment: ExperimentConfig,
    /// Network condition profiles to sweep.
    #[serde(default = "default_profiles")]
    pub profiles: Vec<NetworkConditionProfile>,
    /// Container topology configuration.
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Impairment configuration.
    #[serde(default)]
    pub impairment: ImpairmentConfig,
    /// Load workload configuration.
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Container stats sampling.
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Where revisions come from.
    #[serde(default)]
    pub repository: RepositoryConfig,
}

/// Matrix configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    /// Revisions to benchmark; empty means every remote branch.
    #[serde(default)]
    pub revisions: Vec<String>,
    /// Repetitions per (revision, profile) cell (default: 1).
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    /// Root of the run record store (default: `results`).
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Cells executed at once (default: 1).
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

/// Container topology configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyConfig {
    /// Compose file, relative to the revision's source tree.
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,
    /// Prefix of generated compose project names (default: `wanbench`).
    #[serde(default = "default_project_prefix")]
    pub project_prefix: String,
    /// Rebuild images on every provision (default: true).
    #[serde(default = "default_build")]
    pub build: bool,
    /// Bound on start + readiness + discovery (default: 6 minutes).
    #[serde(default = "default_startup_timeout", with = "duration_str")]
    pub startup_timeout: Duration,
    /// Grace period given to each container on stop (default: 3s).
    #[serde(default = "default_stop_timeout", with = "duration_str")]
    pub stop_timeout: Duration,
    /// Readiness polling interval (default: 1s).
    #[serde(default = "default_poll_interval", with = "duration_str")]
    pub poll_interval: Duration,
    /// Only interfaces with this prefix can be impaired (default: `eth`).
    #[serde(default = "default_interface_prefix")]
    pub interface_prefix: String,
    /// How readiness is decided.
    #[serde(default = "default_readiness")]
    pub readiness: ReadinessProbe,
}

/// Impairment configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImpairmentConfig {
    /// netem queue limit in packets; kernel default when unset.
    #[serde(default)]
    pub queue_limit: Option<u32>,
    /// Roles whose interfaces are impaired; empty means every node.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Load workload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    /// Endpoint receiving the form POSTs.
    #[serde(default = "default_url")]
    pub url: String,
    /// Length of the random `message` field (default: 500).
    #[serde(default = "default_message_length")]
    pub message_length: usize,
    /// Per-request timeout (default: 9s).
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
    /// Samples in this window after workload start are dropped (default: 15s).
    #[serde(default = "default_warmup", with = "duration_str")]
    pub warmup: Duration,
    /// Slack on top of the test duration before a run times out (default: 30s).
    #[serde(default = "default_grace", with = "duration_str")]
    pub grace: Duration,
    /// Pause after a failed request (default: 100ms).
    #[serde(default = "default_error_backoff", with = "duration_str")]
    pub error_backoff: Duration,
    /// Role that must be present in the topology before load starts.
    #[serde(default)]
    pub target_role: Option<String>,
}

/// Container stats sampling.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    /// Sample container stats during the workload (default: true).
    #[serde(default = "default_sampler_enabled")]
    pub enabled: bool,
    /// Sampling interval (default: 1s).
    #[serde(default = "default_sampler_interval", with = "duration_str")]
    pub interval: Duration,
}

/// Where revisions come from.
///
/// With `paths` set, revisions are fixed directories. Otherwise they are
/// git worktrees of `checkout_dir`, cloned from `url` when it is missing.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    /// Remote to clone from.
    #[serde(default)]
    pub url: Option<String>,
    /// Local clone (default: `repo`).
    #[serde(default = "default_checkout_dir")]
    pub checkout_dir: PathBuf,
    /// Parent of per-revision worktrees (default: `worktrees`).
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: PathBuf,
    /// Fixed revision -> source directory map.
    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,
}

// Default value functions
fn default_profiles() -> Vec<NetworkConditionProfile> {
    "500Mbps-10ms-0.001-30s".parse().ok().into_iter().collect()
}

fn default_repetitions() -> u32 {
    1
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_parallelism() -> usize {
    1
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_project_prefix() -> String {
    "wanbench".to_string()
}

fn default_build() -> bool {
    true
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(360) // 6 minutes
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_interface_prefix() -> String {
    "eth".to_string()
}

fn default_readiness() -> ReadinessProbe {
    ReadinessProbe::LogLine {
        service: "jwt-client".to_string(),
        pattern: DEFAULT_READY_LINE.to_string(),
    }
}

fn default_url() -> String {
    "http://localhost:8080/run-interaction/".to_string()
}

fn default_message_length() -> usize {
    500
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(9)
}

fn default_warmup() -> Duration {
    Duration::from_secs(15)
}

fn default_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_error_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_sampler_enabled() -> bool {
    true
}

fn default_sampler_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_checkout_dir() -> PathBuf {
    PathBuf::from("repo")
}

fn default_worktree_dir() -> PathBuf {
    PathBuf::from("worktrees")
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            revisions: Vec::new(),
            repetitions: default_repetitions(),
            results_dir: default_results_dir(),
            parallelism: default_parallelism(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            compose_file: default_compose_file(),
            project_prefix: default_project_prefix(),
            build: default_build(),
            startup_timeout: default_startup_timeout(),
            stop_timeout: default_stop_timeout(),
            poll_interval: default_poll_interval(),
            interface_prefix: default_interface_prefix(),
            readiness: default_readiness(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            message_length: default_message_length(),
            request_timeout: default_request_timeout(),
            warmup: default_warmup(),
            grace: default_grace(),
            error_backoff: default_error_backoff(),
            target_role: None,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: default_sampler_enabled(),
            interval: default_sampler_interval(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: None,
            checkout_dir: default_checkout_dir(),
            worktree_dir: default_worktree_dir(),
            paths: BTreeMap::new(),
        }
    }
}

impl BenchConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.repetitions == 0 {
            return Err(ConfigError::Invalid("experiment.repetitions must be at least 1".into()));
        }
        if self.experiment.parallelism == 0 {
            return Err(ConfigError::Invalid("experiment.parallelism must be at least 1".into()));
        }
        if self.profiles.is_empty() {
            return Err(ConfigError::Invalid("at least one profile is required".into()));
        }
        if self.sampler.enabled && self.sampler.interval.is_zero() {
            return Err(ConfigError::Invalid("sampler.interval must be non-zero".into()));
        }
        if self.workload.message_length == 0 {
            return Err(ConfigError::Invalid("workload.message_length must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = BenchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.experiment.repetitions, 1);
        assert_eq!(config.experiment.parallelism, 1);
        assert_eq!(config.topology.startup_timeout, Duration::from_secs(360));
        assert_eq!(config.workload.message_length, 500);
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profiles[0].label(), "500Mbps-10ms-0.001-30s");
    }

    #[test]
    fn default_readiness_waits_for_client_ready_line() {
        assert_eq!(
            TopologyConfig::default().readiness,
            ReadinessProbe::LogLine {
                service: "jwt-client".into(),
                pattern: DEFAULT_READY_LINE.into(),
            }
        );
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[experiment]
revisions = ["v1", "v2"]
repetitions = 3
results_dir = "/data/results"

[[profiles]]
bandwidth = "10Mbps"
delay = "50ms"
loss_rate = 0.0
test_duration = "60s"

[topology]
compose_file = "compose/bench.yml"
startup_timeout = "2m"
readiness = { kind = "grace", period = "20s" }

[impairment]
queue_limit = 5000
roles = ["client"]

[workload]
url = "http://127.0.0.1:9000/run/"
warmup = "0s"

[sampler]
enabled = false
"#;

        let config: BenchConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.experiment.revisions, vec!["v1", "v2"]);
        assert_eq!(config.experiment.repetitions, 3);
        assert_eq!(config.experiment.results_dir, PathBuf::from("/data/results"));
        assert_eq!(config.profiles[0].label(), "10Mbps-50ms-0-60s");
        assert_eq!(config.topology.startup_timeout, Duration::from_secs(120));
        assert_eq!(
            config.topology.readiness,
            ReadinessProbe::Grace {
                period: Duration::from_secs(20)
            }
        );
        assert_eq!(config.impairment.queue_limit, Some(5000));
        assert_eq!(config.impairment.roles, vec!["client"]);
        assert_eq!(config.workload.warmup, Duration::ZERO);
        assert!(!config.sampler.enabled);
    }

    #[test]
    fn profiles_accept_labels() {
        let config: BenchConfig =
            toml::from_str(r#"profiles = ["10Mbps-50ms-0-60s", "data-1Mbps-200ms-0.05-30s"]"#)
                .unwrap();
        assert_eq!(config.profiles.len(), 2);
        assert_eq!(config.profiles[1].label(), "1Mbps-200ms-0.05-30s");
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let config: BenchConfig = toml::from_str("[experiment]\n[topology]\n").unwrap();
        assert_eq!(config.experiment.results_dir, PathBuf::from("results"));
        assert_eq!(config.topology.interface_prefix, "eth");
        assert_eq!(config.workload.grace, Duration::from_secs(30));
        assert!(config.sampler.enabled);
    }

    #[test]
    fn from_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[experiment]\nrepetitions = \"many\"").unwrap();

        let err = BenchConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { ref path, .. } if path == file.path()));

        let err = BenchConfig::from_file(Path::new("/nonexistent/wanbench.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn zero_repetitions_is_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[experiment]\nrepetitions = 0").unwrap();
        let err = BenchConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
