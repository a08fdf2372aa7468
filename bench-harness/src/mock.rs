//! Mock backends for testing.
//!
//! [`MockContainerBackend`] pretends to be a Docker daemon running compose
//! projects; [`MockNetem`] pretends to be `tc` on a set of interfaces. Both
//! share an in-memory model of root qdiscs, so apply/clear round trips can
//! be observed without touching the kernel. [`SyntheticWorkload`] produces
//! plausible measurements without a system under test.

use crate::backend::{ContainerBackend, ContainerHandle, ExecResult, ProjectSpec, StatsSample};
use crate::error::{ContainerError, ImpairmentError, WorkloadError};
use crate::impairment::ImpairmentBackend;
use crate::topology::InterfaceHandle;
use crate::workload::{record_throughput, Workload, WorkloadContext};
use async_trait::async_trait;
use bench_types::metric_names;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Log line the default mock services print once started.
pub use crate::topology::DEFAULT_READY_LINE as MOCK_READY_LINE;

const DEFAULT_QDISC: &str = "qdisc noqueue 0: root refcnt 2 ";

// ============================================================================
// tc emulation
// ============================================================================

#[derive(Debug, Default)]
struct TcEmulator {
    /// `container:iface` -> installed root qdisc line.
    qdiscs: HashMap<String, String>,
    next_handle: u32,
    adds: usize,
    dels: usize,
    fail_next_add: Option<String>,
}

impl TcEmulator {
    fn run(&mut self, container: &str, args: &[String]) -> ExecResult {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["qdisc", "add", "dev", iface, "root", "netem", params @ ..] => {
                if let Some(stderr) = self.fail_next_add.take() {
                    return exec_failed(2, stderr);
                }
                let key = format!("{}:{}", container, iface);
                if self.qdiscs.contains_key(&key) {
                    return exec_failed(2, "Error: Exclusivity flag on, cannot modify.");
                }
                self.adds += 1;
                self.next_handle += 1;
                let limit = if params.first() == Some(&"limit") {
                    ""
                } else {
                    "limit 1000 "
                };
                let line = format!(
                    "qdisc netem {:x}: root refcnt 2 {}{}",
                    0x8000 + self.next_handle,
                    limit,
                    params.join(" ")
                );
                self.qdiscs.insert(key, line);
                exec_ok("")
            }
            ["qdisc", "del", "dev", iface, "root"] => {
                let key = format!("{}:{}", container, iface);
                if self.qdiscs.remove(&key).is_some() {
                    self.dels += 1;
                    exec_ok("")
                } else {
                    exec_failed(2, "Error: Cannot delete qdisc with handle of zero.")
                }
            }
            ["qdisc", "show", "dev", iface] => {
                let key = format!("{}:{}", container, iface);
                let line = self
                    .qdiscs
                    .get(&key)
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_QDISC);
                exec_ok(&format!("{}\n", line))
            }
            _ => exec_failed(1, "Command line is not complete. Try option \"help\""),
        }
    }

    fn forget_container(&mut self, container: &str) {
        let prefix = format!("{}:", container);
        self.qdiscs.retain(|k, _| !k.starts_with(&prefix));
    }
}

fn exec_ok(stdout: &str) -> ExecResult {
    ExecResult {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

fn exec_failed(exit_code: i64, stderr: impl Into<String>) -> ExecResult {
    ExecResult {
        stdout: String::new(),
        stderr: stderr.into(),
        exit_code,
    }
}

// ============================================================================
// MockContainerBackend
// ============================================================================

#[derive(Debug, Clone)]
struct MockService {
    name: String,
    interfaces: Vec<String>,
    logs: String,
}

#[derive(Debug, Clone)]
struct MockContainer {
    project: String,
    handle: ContainerHandle,
}

#[derive(Debug, Default)]
struct MockBackendInner {
    services: Vec<MockService>,
    containers: BTreeMap<String, MockContainer>,
    networks: BTreeMap<String, String>,
    tc: TcEmulator,
    next_id: u64,
    start_delay: Option<Duration>,
    fail_next_start: Option<String>,
    fail_stop: HashSet<String>,
    fail_remove: HashSet<String>,
    starts: usize,
    stops: usize,
    removes: usize,
    network_sweeps: usize,
    project_removals: usize,
    stats_calls: u64,
    exec_log: Vec<(String, Vec<String>)>,
}

/// Mock container runtime.
///
/// By default every project runs a `client` and a `server` service, each
/// with one `eth0` interface, both logging [`MOCK_READY_LINE`].
#[derive(Debug)]
pub struct MockContainerBackend {
    inner: Arc<Mutex<MockBackendInner>>,
}

impl Default for MockContainerBackend {
    fn default() -> Self {
        Self::without_services()
            .with_service("client", &["eth0"])
            .with_service("server", &["eth0"])
    }
}

impl MockContainerBackend {
    /// Create a mock with the default two-service project.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose projects start no services.
    pub fn without_services() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBackendInner::default())),
        }
    }

    /// Add a service with the given interfaces to every future project.
    pub fn with_service(self, name: &str, interfaces: &[&str]) -> Self {
        self.lock().services.push(MockService {
            name: name.to_string(),
            interfaces: interfaces.iter().map(|i| i.to_string()).collect(),
            logs: format!("{}\n", MOCK_READY_LINE),
        });
        self
    }

    /// Replace what a service logs.
    pub fn set_logs(&self, service: &str, logs: &str) {
        let mut inner = self.lock();
        for s in inner.services.iter_mut().filter(|s| s.name == service) {
            s.logs = logs.to_string();
        }
    }

    /// Delay every `start_project()` call (simulates a slow build).
    pub fn set_start_delay(&self, delay: Duration) {
        self.lock().start_delay = Some(delay);
    }

    /// Cause the next `start_project()` to fail.
    pub fn fail_next_start(&self, error: &str) {
        self.lock().fail_next_start = Some(error.to_string());
    }

    /// Cause every stop of this service's containers to fail.
    pub fn fail_stop(&self, service: &str) {
        self.lock().fail_stop.insert(service.to_string());
    }

    /// Cause every removal of this service's containers to fail.
    pub fn fail_remove(&self, service: &str) {
        self.lock().fail_remove.insert(service.to_string());
    }

    /// Cause the next `tc qdisc add` to fail with the given stderr.
    pub fn fail_next_tc_add(&self, stderr: &str) {
        self.lock().tc.fail_next_add = Some(stderr.to_string());
    }

    /// Number of `start_project()` calls.
    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    /// Number of `stop_container()` calls.
    pub fn stops(&self) -> usize {
        self.lock().stops
    }

    /// Number of `remove_container()` calls.
    pub fn removes(&self) -> usize {
        self.lock().removes
    }

    /// Number of project network sweeps; a teardown performs exactly one.
    pub fn teardowns(&self) -> usize {
        self.lock().network_sweeps
    }

    /// Number of `remove_project()` calls.
    pub fn project_removals(&self) -> usize {
        self.lock().project_removals
    }

    /// Containers that exist right now.
    pub fn live_containers(&self) -> usize {
        self.lock().containers.len()
    }

    /// Networks that exist right now.
    pub fn live_networks(&self) -> usize {
        self.lock().networks.len()
    }

    /// Number of `tc` invocations across all containers.
    pub fn tc_calls(&self) -> usize {
        self.lock()
            .exec_log
            .iter()
            .filter(|(_, cmd)| cmd.first().map(String::as_str) == Some("tc"))
            .count()
    }

    /// Number of successful `tc qdisc add` invocations.
    pub fn tc_adds(&self) -> usize {
        self.lock().tc.adds
    }

    /// Number of successful `tc qdisc del` invocations.
    pub fn tc_dels(&self) -> usize {
        self.lock().tc.dels
    }

    /// Installed root qdisc of a container interface, if any.
    pub fn qdisc(&self, container: &str, interface: &str) -> Option<String> {
        self.lock()
            .tc
            .qdiscs
            .get(&format!("{}:{}", container, interface))
            .cloned()
    }

    /// Every command executed, as `(container name, argv)`.
    pub fn exec_log(&self) -> Vec<(String, Vec<String>)> {
        self.lock().exec_log.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockBackendInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for MockContainerBackend {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn ip_link_output(interfaces: &[String]) -> String {
    let mut out = String::from(
        "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT\n    \
         link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00\n",
    );
    for (i, iface) in interfaces.iter().enumerate() {
        let index = 40 + 2 * i;
        out.push_str(&format!(
            "{}: {}@if{}: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP\n    \
             link/ether 02:42:ac:12:00:{:02x} brd ff:ff:ff:ff:ff:ff link-netnsid 0\n",
            index,
            iface,
            index + 1,
            i + 2
        ));
    }
    out
}

#[async_trait]
impl ContainerBackend for MockContainerBackend {
    async fn start_project(&self, spec: &ProjectSpec) -> Result<(), ContainerError> {
        let delay = {
            let mut inner = self.lock();
            inner.starts += 1;
            if let Some(error) = inner.fail_next_start.take() {
                return Err(ContainerError::Compose(error));
            }
            inner.start_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        let services = inner.services.clone();
        for service in services {
            inner.next_id += 1;
            let handle = ContainerHandle {
                id: format!("{:012x}", inner.next_id),
                name: format!("{}-{}-1", spec.project, service.name),
                service: service.name.clone(),
            };
            inner.containers.insert(
                handle.id.clone(),
                MockContainer {
                    project: spec.project.clone(),
                    handle,
                },
            );
        }
        inner
            .networks
            .insert(format!("{}_default", spec.project), spec.project.clone());
        Ok(())
    }

    async fn remove_project(&self, project: &str) -> Result<(), ContainerError> {
        let mut inner = self.lock();
        inner.project_removals += 1;
        let gone: Vec<String> = inner
            .containers
            .values()
            .filter(|c| c.project == project)
            .map(|c| c.handle.name.clone())
            .collect();
        inner.containers.retain(|_, c| c.project != project);
        for name in gone {
            inner.tc.forget_container(&name);
        }
        inner.networks.retain(|_, p| p != project);
        Ok(())
    }

    async fn list_containers(&self, project: &str) -> Result<Vec<ContainerHandle>, ContainerError> {
        let mut handles: Vec<ContainerHandle> = self
            .lock()
            .containers
            .values()
            .filter(|c| c.project == project)
            .map(|c| c.handle.clone())
            .collect();
        handles.sort_by(|a, b| (&a.service, &a.name).cmp(&(&b.service, &b.name)));
        Ok(handles)
    }

    async fn exec(
        &self,
        container: &ContainerHandle,
        cmd: Vec<String>,
    ) -> Result<ExecResult, ContainerError> {
        let mut inner = self.lock();
        if !inner.containers.contains_key(&container.id) {
            return Err(ContainerError::NotFound(container.name.clone()));
        }
        inner.exec_log.push((container.name.clone(), cmd.clone()));

        let argv: Vec<&str> = cmd.iter().map(String::as_str).collect();
        let result = match argv.as_slice() {
            ["tc", ..] => inner.tc.run(&container.name, &cmd[1..]),
            ["ip", "link", "show"] => {
                let interfaces = inner
                    .services
                    .iter()
                    .find(|s| s.name == container.service)
                    .map(|s| s.interfaces.clone())
                    .unwrap_or_default();
                exec_ok(&ip_link_output(&interfaces))
            }
            _ => exec_failed(127, format!("{}: not found", cmd.join(" "))),
        };
        Ok(result)
    }

    async fn logs(&self, container: &ContainerHandle) -> Result<String, ContainerError> {
        Ok(self
            .lock()
            .services
            .iter()
            .find(|s| s.name == container.service)
            .map(|s| s.logs.clone())
            .unwrap_or_default())
    }

    async fn stats(&self, container: &ContainerHandle) -> Result<StatsSample, ContainerError> {
        let mut inner = self.lock();
        if !inner.containers.contains_key(&container.id) {
            return Err(ContainerError::NotFound(container.name.clone()));
        }
        inner.stats_calls += 1;
        let n = inner.stats_calls;
        Ok(StatsSample {
            cpu_total: n * 10_000_000,
            system_cpu: n * 100_000_000,
            memory_usage: 64 * 1024 * 1024,
            memory_limit: 256 * 1024 * 1024,
            net_bytes: n * 125_000,
        })
    }

    async fn stop_container(
        &self,
        container: &ContainerHandle,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        let mut inner = self.lock();
        inner.stops += 1;
        if inner.fail_stop.contains(&container.service) {
            return Err(ContainerError::Backend(format!(
                "simulated stop failure for {}",
                container.name
            )));
        }
        Ok(())
    }

    async fn remove_container(&self, container: &ContainerHandle) -> Result<(), ContainerError> {
        let mut inner = self.lock();
        inner.removes += 1;
        if inner.fail_remove.contains(&container.service) {
            return Err(ContainerError::Backend(format!(
                "simulated remove failure for {}",
                container.name
            )));
        }
        inner
            .containers
            .remove(&container.id)
            .ok_or_else(|| ContainerError::NotFound(container.name.clone()))?;
        inner.tc.forget_container(&container.name);
        Ok(())
    }

    async fn list_networks(&self, project: &str) -> Result<Vec<String>, ContainerError> {
        let mut inner = self.lock();
        inner.network_sweeps += 1;
        Ok(inner
            .networks
            .iter()
            .filter(|(_, p)| p.as_str() == project)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn remove_network(&self, name: &str) -> Result<(), ContainerError> {
        self.lock()
            .networks
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))
    }
}

// ============================================================================
// MockNetem
// ============================================================================

#[derive(Debug, Default)]
struct MockNetemInner {
    tc: TcEmulator,
    calls: Vec<(String, Vec<String>)>,
}

/// Mock `tc` for driving an `ImpairmentController` directly.
#[derive(Debug, Default)]
pub struct MockNetem {
    inner: Arc<Mutex<MockNetemInner>>,
}

impl MockNetem {
    /// Create a mock with every interface clean.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a qdisc was installed out of band.
    pub fn preinstall(&self, target: &InterfaceHandle, qdisc: &str) {
        self.lock().tc.qdiscs.insert(target.to_string(), qdisc.to_string());
    }

    /// Cause the next `tc qdisc add` to fail with the given stderr.
    pub fn fail_next_add(&self, stderr: &str) {
        self.lock().tc.fail_next_add = Some(stderr.to_string());
    }

    /// Installed root qdisc of an interface, if any.
    pub fn qdisc(&self, target: &InterfaceHandle) -> Option<String> {
        self.lock().tc.qdiscs.get(&target.to_string()).cloned()
    }

    /// Number of successful `tc qdisc add` invocations.
    pub fn add_count(&self) -> usize {
        self.lock().tc.adds
    }

    /// Number of successful `tc qdisc del` invocations.
    pub fn del_count(&self) -> usize {
        self.lock().tc.dels
    }

    /// Every invocation, as `(container:iface, args)`.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockNetemInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clone for MockNetem {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl ImpairmentBackend for MockNetem {
    async fn run_tc(
        &self,
        target: &InterfaceHandle,
        args: Vec<String>,
    ) -> Result<ExecResult, ImpairmentError> {
        let mut inner = self.lock();
        inner.calls.push((target.to_string(), args.clone()));
        Ok(inner.tc.run(&target.container.name, &args))
    }
}

// ============================================================================
// SyntheticWorkload
// ============================================================================

/// Workload that derives request latency from the applied profile.
///
/// A request takes two propagation delays plus the time to push
/// `message_length` bytes through the bandwidth cap, and is lost when
/// either direction drops it.
#[derive(Debug, Clone)]
pub struct SyntheticWorkload {
    message_length: usize,
}

impl SyntheticWorkload {
    /// Simulate requests carrying `message_length` bytes.
    pub fn new(message_length: usize) -> Self {
        Self { message_length }
    }

    fn round_trip(&self, ctx: &WorkloadContext) -> Duration {
        let bps = ctx.profile.bandwidth().bits_per_second();
        let transfer = if bps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((self.message_length * 8) as f64 / bps as f64)
        };
        (ctx.profile.delay() * 2 + transfer).max(Duration::from_millis(1))
    }
}

#[async_trait]
impl Workload for SyntheticWorkload {
    async fn run(&self, ctx: WorkloadContext) -> Result<(), WorkloadError> {
        let deadline = tokio::time::Instant::now() + ctx.duration;
        let rtt = self.round_trip(&ctx);
        let keep = 1.0 - ctx.profile.loss_rate().as_fraction();
        let drop_probability = 1.0 - keep * keep;

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(rtt).await;
            let lost = rand::thread_rng().gen::<f64>() < drop_probability;
            if lost {
                ctx.recorder.increment(metric_names::REQUESTS_FAILED, 1.0);
            } else {
                ctx.recorder.record(metric_names::LATENCY, rtt.as_secs_f64());
                ctx.recorder.increment(metric_names::REQUESTS_OK, 1.0);
            }
        }

        record_throughput(&ctx.recorder);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{parse_interfaces, Topology};
    use crate::workload::MetricsRecorder;

    fn spec(project: &str) -> ProjectSpec {
        ProjectSpec {
            project: project.into(),
            compose_file: "docker-compose.yml".into(),
            working_dir: ".".into(),
            build: false,
        }
    }

    #[tokio::test]
    async fn mock_project_lifecycle() {
        let mock = MockContainerBackend::new();
        mock.start_project(&spec("p1")).await.unwrap();

        let containers = mock.list_containers("p1").await.unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "p1-client-1");
        assert_eq!(mock.list_networks("p1").await.unwrap(), vec!["p1_default"]);

        for c in &containers {
            mock.stop_container(c, Duration::from_secs(3)).await.unwrap();
            mock.remove_container(c).await.unwrap();
        }
        mock.remove_network("p1_default").await.unwrap();
        assert_eq!(mock.live_containers(), 0);
        assert_eq!(mock.live_networks(), 0);
    }

    #[tokio::test]
    async fn removing_a_project_leaves_others_running() {
        let mock = MockContainerBackend::new();
        mock.start_project(&spec("p1")).await.unwrap();
        mock.start_project(&spec("p2")).await.unwrap();

        mock.remove_project("p1").await.unwrap();
        assert!(mock.list_containers("p1").await.unwrap().is_empty());
        assert_eq!(mock.list_containers("p2").await.unwrap().len(), 2);
        assert_eq!(mock.live_networks(), 1);
        assert_eq!(mock.project_removals(), 1);
    }

    #[tokio::test]
    async fn mock_ip_link_lists_configured_interfaces() {
        let mock = MockContainerBackend::without_services().with_service("router", &["eth0", "eth1"]);
        mock.start_project(&spec("p2")).await.unwrap();
        let router = &mock.list_containers("p2").await.unwrap()[0];

        let out = mock
            .exec(router, vec!["ip".into(), "link".into(), "show".into()])
            .await
            .unwrap();
        assert_eq!(parse_interfaces(&out.stdout, "eth"), vec!["eth0", "eth1"]);
    }

    #[tokio::test]
    async fn mock_tc_rejects_double_add() {
        let mock = MockContainerBackend::new();
        mock.start_project(&spec("p3")).await.unwrap();
        let client = &mock.list_containers("p3").await.unwrap()[0];
        let add: Vec<String> = "tc qdisc add dev eth0 root netem delay 10ms loss 0%"
            .split(' ')
            .map(String::from)
            .collect();

        assert!(mock.exec(client, add.clone()).await.unwrap().success());
        assert!(!mock.exec(client, add).await.unwrap().success());
        assert!(mock.qdisc("p3-client-1", "eth0").unwrap().contains("delay 10ms"));
        assert_eq!(mock.tc_calls(), 2);
    }

    #[tokio::test]
    async fn exec_in_missing_container_fails() {
        let mock = MockContainerBackend::new();
        let ghost = ContainerHandle {
            id: "nope".into(),
            name: "ghost".into(),
            service: "client".into(),
        };
        assert!(mock.exec(&ghost, vec!["true".into()]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn synthetic_latency_follows_profile() {
        let recorder = MetricsRecorder::new(Duration::ZERO);
        let ctx = WorkloadContext {
            topology: Topology::new("p", "v1", Vec::new()),
            profile: "unlimited-50ms-0-1s".parse().unwrap(),
            duration: Duration::from_secs(1),
            recorder: recorder.clone(),
        };
        SyntheticWorkload::new(500).run(ctx).await.unwrap();

        let m = recorder.snapshot();
        let latency = m.get(metric_names::LATENCY).unwrap().values();
        assert_eq!(latency.len(), 10);
        assert!(latency.iter().all(|l| (l - 0.1).abs() < 1e-9));
        assert!(m.get(metric_names::REQUESTS_FAILED).is_none());
        assert!(m.get(metric_names::THROUGHPUT_RPS).is_some());
    }
}
