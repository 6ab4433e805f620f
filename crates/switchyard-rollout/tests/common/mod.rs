//! Fakes for every collaborator the orchestrator drives.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::broadcast;

use switchyard_core::{Severity, SwitchyardConfig};
use switchyard_health::{HealthProbe, ProbeResult};
use switchyard_metrics::{MetricsBackend, MetricsSample};
use switchyard_migrate::MemorySchemaDatabase;
use switchyard_rollout::*;
use switchyard_state::{StateStore, TrafficWeights};
use switchyard_traffic::LoadBalancerControl;

pub fn healthy_sample() -> MetricsSample {
    MetricsSample {
        error_rate: 0.001,
        response_time_ms: 120.0,
        throughput: 250.0,
        cpu_usage: 35.0,
        memory_usage: 40.0,
    }
}

pub fn failing_sample(error_rate: f64) -> MetricsSample {
    MetricsSample {
        error_rate,
        ..healthy_sample()
    }
}

#[derive(Default)]
pub struct RecordingLoadBalancer {
    calls: Mutex<Vec<TrafficWeights>>,
    fail: AtomicBool,
}

impl RecordingLoadBalancer {
    pub fn calls(&self) -> Vec<TrafficWeights> {
        self.calls.lock().unwrap().clone()
    }

    pub fn current(&self) -> Option<TrafficWeights> {
        self.calls.lock().unwrap().last().cloned()
    }

    pub fn weight(&self, environment: &str) -> u8 {
        self.current().map_or(0, |w| w.get(environment))
    }

    pub fn fail_from_now(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LoadBalancerControl for RecordingLoadBalancer {
    async fn set_weights(&self, _listener: &str, weights: &TrafficWeights) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("listener rule update rejected");
        }
        self.calls.lock().unwrap().push(weights.clone());
        Ok(())
    }
}

/// Per-environment samples; optionally degrades an environment once the
/// load balancer sends it at least a given share of traffic.
pub struct FakeMetrics {
    lb: Arc<RecordingLoadBalancer>,
    samples: Mutex<BTreeMap<String, MetricsSample>>,
    degrade: Mutex<Option<(String, u8, MetricsSample)>>,
    queries: AtomicUsize,
}

impl FakeMetrics {
    pub fn new(lb: Arc<RecordingLoadBalancer>) -> Self {
        Self {
            lb,
            samples: Mutex::new(BTreeMap::new()),
            degrade: Mutex::new(None),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, environment: &str, sample: MetricsSample) {
        self.samples.lock().unwrap().insert(environment.to_string(), sample);
    }

    pub fn degrade_at(&self, environment: &str, percent: u8, sample: MetricsSample) {
        *self.degrade.lock().unwrap() = Some((environment.to_string(), percent, sample));
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsBackend for FakeMetrics {
    async fn query(&self, environment: &str, _window: Duration) -> anyhow::Result<MetricsSample> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some((env, percent, bad)) = self.degrade.lock().unwrap().clone() {
            if env == environment && self.lb.weight(environment) >= percent {
                return Ok(bad);
            }
        }
        Ok(self
            .samples
            .lock()
            .unwrap()
            .get(environment)
            .copied()
            .unwrap_or_else(healthy_sample))
    }
}

#[derive(Default)]
pub struct FakeProvisioner {
    pub provisions: Mutex<Vec<ProvisionRequest>>,
    pub decommissions: Mutex<Vec<String>>,
    pub lookups: AtomicUsize,
    active: Mutex<BTreeMap<String, String>>,
    fail: AtomicBool,
}

impl FakeProvisioner {
    pub fn running(&self, environment: &str, version: &str) {
        self.active
            .lock()
            .unwrap()
            .insert(environment.to_string(), version.to_string());
    }

    pub fn stop(&self, environment: &str) {
        self.active.lock().unwrap().remove(environment);
    }

    pub fn fail_provisioning(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn provisions(&self) -> Vec<ProvisionRequest> {
        self.provisions.lock().unwrap().clone()
    }

    pub fn decommissions(&self) -> Vec<String> {
        self.decommissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeProvisioner for FakeProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> anyhow::Result<EnvironmentHandle> {
        self.provisions.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("capacity unavailable in region");
        }
        self.running(&request.environment, &request.version);
        Ok(EnvironmentHandle {
            name: request.environment.clone(),
            version: request.version.clone(),
            endpoints: vec![
                format!("{}-1.internal:8080", request.environment),
                format!("{}-2.internal:8080", request.environment),
            ],
        })
    }

    async fn decommission(&self, environment: &str) -> anyhow::Result<()> {
        self.decommissions.lock().unwrap().push(environment.to_string());
        self.active.lock().unwrap().remove(environment);
        Ok(())
    }

    async fn active_version(&self, environment: &str) -> anyhow::Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.active.lock().unwrap().get(environment).cloned())
    }
}

/// Health probe whose answer the test flips.
pub struct SwitchProbe {
    healthy: AtomicBool,
}

impl SwitchProbe {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl Default for SwitchProbe {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl HealthProbe for SwitchProbe {
    fn name(&self) -> &str {
        "switch"
    }

    async fn check(&self, _target: &str) -> ProbeResult {
        if self.healthy.load(Ordering::SeqCst) {
            ProbeResult::Healthy
        } else {
            ProbeResult::Unhealthy("status 503".to_string())
        }
    }
}

#[derive(Default)]
pub struct FakeSmokeTests {
    fail: AtomicBool,
    pub runs: AtomicUsize,
}

impl FakeSmokeTests {
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SmokeTester for FakeSmokeTests {
    async fn run(&self, environment: &EnvironmentHandle) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("POST /checkout returned 500 on {}", environment.name);
        }
        Ok(())
    }
}

/// Replays scripted statuses, then either ends or stalls forever.
#[derive(Default)]
pub struct FakeWorkloads {
    pub patches: Mutex<Vec<WorkloadPatch>>,
    statuses: Mutex<Vec<WorkloadStatus>>,
    stall: AtomicBool,
}

impl FakeWorkloads {
    pub fn script(&self, statuses: Vec<WorkloadStatus>, stall: bool) {
        *self.statuses.lock().unwrap() = statuses;
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn patches(&self) -> Vec<WorkloadPatch> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkloadOrchestrator for FakeWorkloads {
    async fn patch_workload(&self, patch: &WorkloadPatch) -> anyhow::Result<()> {
        self.patches.lock().unwrap().push(patch.clone());
        Ok(())
    }

    async fn watch_rollout(
        &self,
        _name: &str,
        _namespace: &str,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<WorkloadStatus>>> {
        let statuses = self.statuses.lock().unwrap().clone();
        let scripted = stream::iter(statuses.into_iter().map(Ok));
        if self.stall.load(Ordering::SeqCst) {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }
}

pub fn status(available: u32, updated: u32, total: u32) -> WorkloadStatus {
    WorkloadStatus {
        available,
        updated,
        total,
        failure: None,
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Severity, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Severity, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &str, severity: Severity, message: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), severity, message.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub state: StateStore,
    pub lb: Arc<RecordingLoadBalancer>,
    pub metrics: Arc<FakeMetrics>,
    pub provisioner: Arc<FakeProvisioner>,
    pub workloads: Arc<FakeWorkloads>,
    pub smoke: Arc<FakeSmokeTests>,
    pub notifier: Arc<RecordingNotifier>,
    pub probe: Arc<SwitchProbe>,
    pub database: MemorySchemaDatabase,
    pub config: SwitchyardConfig,
}

impl Harness {
    pub fn new() -> Self {
        let lb = Arc::new(RecordingLoadBalancer::default());
        let provisioner = Arc::new(FakeProvisioner::default());
        provisioner.running("blue", "1.4.2");
        Self {
            state: StateStore::open_in_memory().unwrap(),
            metrics: Arc::new(FakeMetrics::new(lb.clone())),
            lb,
            provisioner,
            workloads: Arc::new(FakeWorkloads::default()),
            smoke: Arc::new(FakeSmokeTests::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            probe: Arc::new(SwitchProbe::default()),
            database: MemorySchemaDatabase::new(),
            config: SwitchyardConfig::scaffold("api"),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            provisioner: self.provisioner.clone(),
            workloads: self.workloads.clone(),
            load_balancer: self.lb.clone(),
            metrics: self.metrics.clone(),
            database: Arc::new(self.database.clone()),
            smoke_tests: self.smoke.clone(),
            notifier: self.notifier.clone(),
            probes: vec![self.probe.clone() as Arc<dyn HealthProbe>],
        }
    }

    pub fn orchestrator(&self) -> RolloutOrchestrator {
        RolloutOrchestrator::new(self.config.clone(), self.state.clone(), self.collaborators()).unwrap()
    }
}

/// Short windows so paused-clock tests stay small.
pub fn quick_options() -> DeployOptions {
    DeployOptions {
        monitor_duration_ms: 120_000,
        switch_duration_ms: 100_000,
        canary_duration_ms: 300_000,
        stage_duration_ms: 120_000,
        ..Default::default()
    }
}

/// Every event emitted so far, by wire name.
pub fn drain(rx: &mut broadcast::Receiver<DeployEvent>) -> Vec<DeployEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[DeployEvent]) -> Vec<&'static str> {
    events.iter().map(DeployEvent::name).collect()
}
