//! Benchmark workloads and metric capture.
//!
//! A [`Workload`] drives the system under test for a profile's test
//! duration and writes what it observes into a shared [`MetricsRecorder`].
//! The recorder outlives the workload task, so whatever was captured before
//! a timeout or panic is still available to the executor.

use crate::config::WorkloadConfig;
use crate::error::WorkloadError;
use crate::topology::Topology;
use async_trait::async_trait;
use bench_types::{metric_names, Metrics, NetworkConditionProfile};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

// ============================================================================
// MetricsRecorder
// ============================================================================

#[derive(Debug, Default)]
struct RecorderInner {
    metrics: Metrics,
    counters: BTreeMap<String, f64>,
}

/// Thread-safe sink for samples and counters produced during a run.
///
/// Anything recorded within the warm-up window after creation is dropped.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    inner: Arc<Mutex<RecorderInner>>,
    started: Instant,
    warmup: Duration,
}

impl MetricsRecorder {
    /// Start recording now, discarding the first `warmup`.
    pub fn new(warmup: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecorderInner::default())),
            started: Instant::now(),
            warmup,
        }
    }

    /// True while still inside the warm-up window.
    pub fn warming_up(&self) -> bool {
        self.started.elapsed() < self.warmup
    }

    /// Time since recording started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Measured time so far (elapsed minus warm-up).
    pub fn measured(&self) -> Duration {
        self.started.elapsed().saturating_sub(self.warmup)
    }

    /// Append one sample to a series.
    pub fn record(&self, name: &str, value: f64) {
        if self.warming_up() {
            return;
        }
        self.lock().metrics.extend_samples(name, [value]);
    }

    /// Add to a counter.
    pub fn increment(&self, name: &str, by: f64) {
        if self.warming_up() {
            return;
        }
        *self.lock().counters.entry(name.to_string()).or_insert(0.0) += by;
    }

    /// Set a scalar metric.
    pub fn set(&self, name: &str, value: f64) {
        self.lock().metrics.set_scalar(name, value);
    }

    /// Everything recorded so far; counters appear as scalars.
    pub fn snapshot(&self) -> Metrics {
        let inner = self.lock();
        let mut metrics = inner.metrics.clone();
        for (name, value) in &inner.counters {
            metrics.set_scalar(name.clone(), *value);
        }
        metrics
    }

    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Workload trait
// ============================================================================

/// What a workload gets to work with.
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    /// The running deployment.
    pub topology: Topology,
    /// Profile currently applied.
    pub profile: NetworkConditionProfile,
    /// How long to drive load.
    pub duration: Duration,
    /// Where to put measurements.
    pub recorder: MetricsRecorder,
}

/// A benchmark workload run against a provisioned topology.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Drive load for `ctx.duration`, recording into `ctx.recorder`.
    async fn run(&self, ctx: WorkloadContext) -> Result<(), WorkloadError>;
}

// ============================================================================
// HttpLoadWorkload
// ============================================================================

/// Closed-loop HTTP load generator.
///
/// Repeatedly POSTs a form field `message` of random lowercase letters and
/// records the round-trip latency of each request in seconds. A request
/// that times out records the timeout as its latency.
pub struct HttpLoadWorkload {
    client: reqwest::Client,
    config: WorkloadConfig,
}

impl HttpLoadWorkload {
    /// Build the HTTP client for this workload.
    pub fn new(config: WorkloadConfig) -> Result<Self, WorkloadError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

fn random_message(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

#[async_trait]
impl Workload for HttpLoadWorkload {
    async fn run(&self, ctx: WorkloadContext) -> Result<(), WorkloadError> {
        if let Some(role) = &self.config.target_role {
            if ctx.topology.node(role).is_none() {
                return Err(WorkloadError::MissingNode { role: role.clone() });
            }
        }

        let recorder = &ctx.recorder;
        let deadline = Instant::now() + ctx.duration;
        info!(
            "Driving {} for {:?} under {}",
            self.config.url, ctx.duration, ctx.profile
        );

        while Instant::now() < deadline {
            let message = random_message(self.config.message_length);
            let sent = Instant::now();
            let response = self
                .client
                .post(&self.config.url)
                .form(&[("message", message)])
                .send()
                .await;

            let outcome = match response {
                Ok(resp) if resp.status().is_success() => resp.bytes().await.map(|_| ()),
                Ok(resp) => {
                    debug!("Request rejected with {}", resp.status());
                    recorder.increment(metric_names::REQUESTS_FAILED, 1.0);
                    tokio::time::sleep(self.config.error_backoff).await;
                    continue;
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    recorder.record(metric_names::LATENCY, sent.elapsed().as_secs_f64());
                    recorder.increment(metric_names::REQUESTS_OK, 1.0);
                }
                Err(e) if e.is_timeout() => {
                    recorder.record(
                        metric_names::LATENCY,
                        self.config.request_timeout.as_secs_f64(),
                    );
                    recorder.increment(metric_names::REQUESTS_FAILED, 1.0);
                }
                Err(e) => {
                    debug!("Request failed: {}", e);
                    recorder.increment(metric_names::REQUESTS_FAILED, 1.0);
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        record_throughput(recorder);
        Ok(())
    }
}

/// Set `throughput_rps` from the `requests_ok` counter and measured time.
pub(crate) fn record_throughput(recorder: &MetricsRecorder) {
    let measured = recorder.measured().as_secs_f64();
    if measured > 0.0 {
        let ok = recorder
            .snapshot()
            .get(metric_names::REQUESTS_OK)
            .and_then(|v| v.values().first().copied())
            .unwrap_or(0.0);
        recorder.set(metric_names::THROUGHPUT_RPS, ok / measured);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_message_is_lowercase_ascii() {
        let m = random_message(500);
        assert_eq!(m.len(), 500);
        assert!(m.bytes().all(|b| b.is_ascii_lowercase()));
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_samples_are_dropped() {
        let recorder = MetricsRecorder::new(Duration::from_secs(15));
        recorder.record(metric_names::LATENCY, 1.0);
        recorder.increment(metric_names::REQUESTS_OK, 1.0);

        tokio::time::advance(Duration::from_secs(16)).await;
        recorder.record(metric_names::LATENCY, 2.0);
        recorder.increment(metric_names::REQUESTS_OK, 1.0);

        let m = recorder.snapshot();
        assert_eq!(m.get(metric_names::LATENCY).unwrap().values(), &[2.0]);
        assert_eq!(m.get(metric_names::REQUESTS_OK).unwrap().values(), &[1.0]);
        assert_eq!(recorder.measured(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let recorder = MetricsRecorder::new(Duration::ZERO);
        let other = recorder.clone();
        other.record("x", 1.0);
        other.set("y", 3.0);
        let m = recorder.snapshot();
        assert_eq!(m.len(), 2);
    }

    #[tokio::test]
    async fn missing_target_role_is_an_error() {
        let config = WorkloadConfig {
            target_role: Some("jwt-client".into()),
            ..WorkloadConfig::default()
        };
        let workload = HttpLoadWorkload::new(config).unwrap();
        let ctx = WorkloadContext {
            topology: Topology::new("p", "v1", Vec::new()),
            profile: "10Mbps-50ms-0-60s".parse().unwrap(),
            duration: Duration::from_secs(1),
            recorder: MetricsRecorder::new(Duration::ZERO),
        };
        let err = workload.run(ctx).await.unwrap_err();
        assert!(matches!(err, WorkloadError::MissingNode { .. }));
    }
}
