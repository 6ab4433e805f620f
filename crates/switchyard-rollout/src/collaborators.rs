//! Infrastructure the orchestrator drives but does not own.
//!
//! Each trait is a seam for one external system (compute provisioning,
//! the container platform, smoke tests, paging). Implementations return
//! `anyhow::Result`; the orchestrator wraps failures with the step name.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tracing::{error, info, warn};

use switchyard_core::Severity;
use switchyard_health::{HealthProbe, ProbeResult};
use switchyard_metrics::MetricsBackend;
use switchyard_migrate::SchemaDatabase;
use switchyard_traffic::LoadBalancerControl;

/// What to bring up, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub environment: String,
    pub version: String,
    /// Always includes `ENVIRONMENT` and `VERSION`.
    pub env_vars: BTreeMap<String, String>,
    /// Share of full capacity to run; canaries run smaller.
    pub capacity_percent: u8,
}

/// A provisioned environment and the addresses serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub name: String,
    pub version: String,
    /// `host:port` of each instance, probed before traffic moves.
    pub endpoints: Vec<String>,
}

#[async_trait]
pub trait ComputeProvisioner: Send + Sync {
    /// Create the environment or update it in place to `request.version`.
    async fn provision(&self, request: &ProvisionRequest) -> anyhow::Result<EnvironmentHandle>;

    async fn decommission(&self, environment: &str) -> anyhow::Result<()>;

    /// Version currently running in `environment`, if any.
    async fn active_version(&self, environment: &str) -> anyhow::Result<Option<String>>;
}

/// Image update for a platform-managed workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadPatch {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub max_surge_percent: u8,
    pub max_unavailable_percent: u8,
}

/// One observation of a platform rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub available: u32,
    pub updated: u32,
    pub total: u32,
    /// Set when the platform gave up on the rollout.
    pub failure: Option<String>,
}

impl WorkloadStatus {
    pub fn converged(&self) -> bool {
        self.failure.is_none() && self.total > 0 && self.updated == self.total && self.available == self.total
    }
}

#[async_trait]
pub trait WorkloadOrchestrator: Send + Sync {
    async fn patch_workload(&self, patch: &WorkloadPatch) -> anyhow::Result<()>;

    /// Status updates for the rollout of `name`, until the stream ends.
    async fn watch_rollout(
        &self,
        name: &str,
        namespace: &str,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<WorkloadStatus>>>;
}

#[async_trait]
pub trait SmokeTester: Send + Sync {
    /// Exercise a freshly provisioned environment before it takes traffic.
    async fn run(&self, environment: &EnvironmentHandle) -> anyhow::Result<()>;
}

/// Smoke tests expressed as probes run against every endpoint.
pub struct ProbeSmokeTests {
    probes: Vec<Arc<dyn HealthProbe>>,
}

impl ProbeSmokeTests {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        Self { probes }
    }
}

#[async_trait]
impl SmokeTester for ProbeSmokeTests {
    async fn run(&self, environment: &EnvironmentHandle) -> anyhow::Result<()> {
        for endpoint in &environment.endpoints {
            for probe in &self.probes {
                match probe.check(endpoint).await {
                    ProbeResult::Healthy => {}
                    ProbeResult::Unhealthy(reason) | ProbeResult::Failed(reason) => {
                        anyhow::bail!("{} on {endpoint}: {reason}", probe.name());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fire-and-forget operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, severity: Severity, message: &str) -> anyhow::Result<()>;
}

/// Writes notifications to the log instead of paging anyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &str, severity: Severity, message: &str) -> anyhow::Result<()> {
        match severity {
            Severity::Info => info!(%channel, "{message}"),
            Severity::Warning => warn!(%channel, "{message}"),
            Severity::Critical => error!(%channel, "{message}"),
        }
        Ok(())
    }
}

/// Everything the orchestrator needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub provisioner: Arc<dyn ComputeProvisioner>,
    pub workloads: Arc<dyn WorkloadOrchestrator>,
    pub load_balancer: Arc<dyn LoadBalancerControl>,
    pub metrics: Arc<dyn MetricsBackend>,
    pub database: Arc<dyn SchemaDatabase>,
    pub smoke_tests: Arc<dyn SmokeTester>,
    pub notifier: Arc<dyn Notifier>,
    /// Probes the health gate runs against each new endpoint.
    pub probes: Vec<Arc<dyn HealthProbe>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ProbeResult);

    #[async_trait]
    impl HealthProbe for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn check(&self, _target: &str) -> ProbeResult {
            self.0.clone()
        }
    }

    fn env() -> EnvironmentHandle {
        EnvironmentHandle {
            name: "green".into(),
            version: "2.0.0".into(),
            endpoints: vec!["10.0.0.1:8080".into(), "10.0.0.2:8080".into()],
        }
    }

    #[tokio::test]
    async fn probe_smoke_tests_pass_when_all_healthy() {
        let smoke = ProbeSmokeTests::new(vec![Arc::new(Fixed(ProbeResult::Healthy))]);
        smoke.run(&env()).await.unwrap();
    }

    #[tokio::test]
    async fn probe_smoke_tests_report_first_failure() {
        let smoke = ProbeSmokeTests::new(vec![Arc::new(Fixed(ProbeResult::Unhealthy(
            "status 500".into(),
        )))]);
        let err = smoke.run(&env()).await.unwrap_err();
        assert_eq!(err.to_string(), "fixed on 10.0.0.1:8080: status 500");
    }

    #[test]
    fn workload_convergence() {
        let mut status = WorkloadStatus {
            available: 4,
            updated: 4,
            total: 4,
            failure: None,
        };
        assert!(status.converged());
        status.available = 3;
        assert!(!status.converged());
        status.available = 4;
        status.failure = Some("ImagePullBackOff".into());
        assert!(!status.converged());
    }
}
