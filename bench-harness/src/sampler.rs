//! Background container resource sampler.
//!
//! While a workload runs, every container of the topology is polled for
//! stats at a fixed interval. Consecutive snapshots are turned into
//! `cpu_usage` (share of host CPU), `memory_usage` (share of the limit)
//! and `net_kbps` (traffic rate) samples.

use crate::backend::{ContainerBackend, ContainerHandle, StatsSample};
use crate::workload::MetricsRecorder;
use bench_types::metric_names;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Spawns sampling tasks.
pub struct StatsSampler {
    backend: Arc<dyn ContainerBackend>,
    interval: Duration,
}

/// A running sampling task.
pub struct SamplerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Stop sampling and wait for the task to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            debug!("Stats sampler ended abnormally: {}", e);
        }
    }
}

impl StatsSampler {
    /// Create a sampler polling every `interval`.
    pub fn new(backend: Arc<dyn ContainerBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    /// Start sampling `containers` into `recorder`.
    pub fn spawn(&self, containers: Vec<ContainerHandle>, recorder: MetricsRecorder) -> SamplerHandle {
        let (stop, mut stop_rx) = watch::channel(false);
        let backend = Arc::clone(&self.backend);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut previous: HashMap<String, (StatsSample, Instant)> = HashMap::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for container in &containers {
                            match backend.stats(container).await {
                                Ok(current) => {
                                    let now = Instant::now();
                                    if let Some((prev, at)) = previous.get(&container.id) {
                                        record_delta(&recorder, prev, &current, now.duration_since(*at));
                                    }
                                    previous.insert(container.id.clone(), (current, now));
                                }
                                Err(e) => debug!("Stats for {} unavailable: {}", container.name, e),
                            }
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        SamplerHandle { stop, task }
    }
}

fn record_delta(recorder: &MetricsRecorder, prev: &StatsSample, cur: &StatsSample, elapsed: Duration) {
    let cpu_delta = cur.cpu_total.saturating_sub(prev.cpu_total) as f64;
    let system_delta = cur.system_cpu.saturating_sub(prev.system_cpu) as f64;
    if system_delta > 0.0 {
        recorder.record(metric_names::CPU_USAGE, cpu_delta / system_delta);
    }

    if cur.memory_limit > 0 {
        recorder.record(
            metric_names::MEMORY_USAGE,
            cur.memory_usage as f64 / cur.memory_limit as f64,
        );
    }

    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        let bits = cur.net_bytes.saturating_sub(prev.net_bytes) as f64 * 8.0;
        recorder.record(metric_names::NET_KBPS, bits / 1_000.0 / secs);
    }
}
