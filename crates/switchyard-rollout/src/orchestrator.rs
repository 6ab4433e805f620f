//! RolloutOrchestrator — one deployment at a time per service.
//!
//! A deploy claims the service record, runs preflight checks and schema
//! migrations, applies the release's feature toggles, hands off to the
//! selected strategy, and validates the result once more. Failures after
//! traffic has moved are rolled back when the error calls for it; the
//! in-progress flag is always cleared before returning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use switchyard_core::{Pacer, Severity, Strategy, SwitchyardConfig, Timings, epoch_millis};
use switchyard_health::{HealthError, HealthGate, HealthProbe, HttpProbe};
use switchyard_metrics::{MetricsGateway, MetricsSample, MonitorReport, aggregate_samples, check_sample};
use switchyard_migrate::{MigrationMode, MigrationRunner, parse_version};
use switchyard_state::{AggregatedMetric, BeginOutcome, DeploymentState, RolloutPhase, StateStore};
use switchyard_toggle::FeatureToggleStore;
use switchyard_traffic::TrafficRouter;

use crate::collaborators::{Collaborators, EnvironmentHandle, ProvisionRequest};
use crate::error::{DeployError, DeployFailure, Progress, RollbackEligibility, RollbackOutcome, breach_summary};
use crate::events::{DeployEvent, EventBus};
use crate::options::DeployOptions;
use crate::preflight::{PreflightCheck, PreflightContext, default_checks, run_checks};
use crate::rollback::RollbackCoordinator;

/// A finished deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployResult {
    pub version: String,
    pub strategy: Strategy,
    /// Environment (or workload, for rolling) now serving the version.
    pub environment: String,
    pub metrics: BTreeMap<String, AggregatedMetric>,
    pub duration: Duration,
    pub migrations_applied: u32,
}

/// Mutable context of one deploy call.
pub(crate) struct Attempt {
    pub version: String,
    pub options: DeployOptions,
    pub pacer: Pacer,
    /// Environment live when the deploy started.
    pub live: String,
    pub progress: Progress,
}

/// What a strategy hands back on success.
pub(crate) struct StrategyOutcome {
    pub environment: String,
    pub metrics: BTreeMap<String, AggregatedMetric>,
    /// Whether `environment` now takes all of the route's traffic.
    pub becomes_live: bool,
    /// Environment to tear down once post-deployment validation passes.
    pub retire: Option<String>,
}

pub struct RolloutOrchestrator {
    pub(crate) config: SwitchyardConfig,
    pub(crate) timings: Timings,
    pub(crate) state: StateStore,
    pub(crate) collaborators: Collaborators,
    pub(crate) traffic: Arc<TrafficRouter>,
    pub(crate) migrations: Arc<MigrationRunner>,
    pub(crate) toggles: FeatureToggleStore,
    pub(crate) metrics: MetricsGateway,
    pub(crate) health: HealthGate,
    pub(crate) events: EventBus,
    preflight: Vec<Arc<dyn PreflightCheck>>,
    rollback: RollbackCoordinator,
}

impl RolloutOrchestrator {
    pub fn new(
        config: SwitchyardConfig,
        state: StateStore,
        collaborators: Collaborators,
    ) -> Result<Self, DeployError> {
        config.validate()?;
        let timings = config.timings()?;

        let traffic = Arc::new(TrafficRouter::new(
            state.clone(),
            collaborators.load_balancer.clone(),
        ));
        let migrations = Arc::new(MigrationRunner::new(
            state.clone(),
            collaborators.database.clone(),
        ));
        let toggles = FeatureToggleStore::new(state.clone());
        let metrics = MetricsGateway::new(collaborators.metrics.clone(), timings.query_window);

        let probes: Vec<Arc<dyn HealthProbe>> = if collaborators.probes.is_empty() {
            vec![Arc::new(HttpProbe::new(
                config.health.path.clone(),
                timings.probe_timeout,
            ))]
        } else {
            collaborators.probes.clone()
        };
        let health = HealthGate::new(probes, timings.health_interval, timings.health_timeout);

        let events = EventBus::default();
        let preflight = default_checks(&config, collaborators.database.clone());
        let rollback = RollbackCoordinator::new(
            state.clone(),
            traffic.clone(),
            migrations.clone(),
            toggles.clone(),
            collaborators.notifier.clone(),
            events.clone(),
        )
        .with_channels(&config.notify.channel, &config.notify.escalation_channel);

        Ok(Self {
            config,
            timings,
            state,
            collaborators,
            traffic,
            migrations,
            toggles,
            metrics,
            health,
            events,
            preflight,
            rollback,
        })
    }

    /// Replace the built-in preflight checks.
    pub fn with_preflight_checks(mut self, checks: Vec<Arc<dyn PreflightCheck>>) -> Self {
        self.preflight = checks;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn toggles(&self) -> &FeatureToggleStore {
        &self.toggles
    }

    pub fn traffic(&self) -> &TrafficRouter {
        &self.traffic
    }

    pub fn migrations(&self) -> &MigrationRunner {
        &self.migrations
    }

    pub fn rollback_coordinator(&self) -> &RollbackCoordinator {
        &self.rollback
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// The service's deployment record, if it was ever deployed.
    pub fn status(&self) -> Result<Option<DeploymentState>, DeployError> {
        Ok(self.state.get_deployment(&self.config.service.name)?)
    }

    /// Deploy `version` without a caller-side cancel signal.
    pub async fn deploy(&self, version: &str, options: DeployOptions) -> Result<DeployResult, DeployFailure> {
        self.deploy_with(version, options, Pacer::unbounded()).await
    }

    /// Deploy `version`, bounded by `pacer` and the configured deployment timeout.
    pub async fn deploy_with(
        &self,
        version: &str,
        options: DeployOptions,
        pacer: Pacer,
    ) -> Result<DeployResult, DeployFailure> {
        parse_version(version).map_err(|e| DeployFailure::untouched(e.into()))?;

        let service = self.config.service.name.as_str();
        let strategy = options.strategy.unwrap_or(self.config.service.default_strategy);
        let pacer = pacer.with_timeout(self.timings.deployment_timeout);
        let started = Instant::now();

        let claimed = self
            .claim(version, strategy)
            .map_err(DeployFailure::untouched)?;
        info!(%service, %version, %strategy, live = %claimed.live_environment, "deployment started");

        let mut attempt = Attempt {
            version: version.to_string(),
            options,
            pacer,
            live: claimed.live_environment,
            progress: Progress::default(),
        };

        match self.execute(&mut attempt, strategy).await {
            Ok(outcome) => self.succeed(attempt, strategy, outcome, started.elapsed()),
            Err(error) => Err(self.fail(attempt, error).await),
        }
    }

    /// Atomic check-and-set on the service record.
    fn claim(&self, version: &str, strategy: Strategy) -> Result<DeploymentState, DeployError> {
        let svc = &self.config.service;
        let outcome = self.state.begin_deployment(&svc.name, |prior| {
            let live = prior
                .as_ref()
                .map(|p| p.live_environment.clone())
                .unwrap_or_else(|| svc.stable_environment.clone());
            DeploymentState {
                service: svc.name.clone(),
                in_progress: true,
                current_version: prior
                    .map(|p| p.current_version)
                    .unwrap_or_else(|| "unknown".to_string()),
                target_version: version.to_string(),
                start_time: epoch_millis(),
                strategy,
                phase: RolloutPhase::Pending,
                metrics: BTreeMap::new(),
                live_environment: live,
                candidate_environment: None,
                route: svc.route.clone(),
                schema_version_before: None,
                migrations_applied: 0,
                traffic_touched: false,
                previous_toggles: BTreeMap::new(),
                last_error: None,
                finished_at: None,
            }
        })?;
        match outcome {
            BeginOutcome::Started(state) => Ok(state),
            BeginOutcome::InProgress(current) => {
                warn!(service = %svc.name, target = %current.target_version, "deployment already in progress");
                Err(DeployError::DeploymentInProgress {
                    service: svc.name.clone(),
                    version: current.target_version,
                })
            }
        }
    }

    async fn execute(&self, attempt: &mut Attempt, strategy: Strategy) -> Result<StrategyOutcome, DeployError> {
        let service = self.config.service.name.clone();

        let current_version = self.current_version(attempt).await?;
        self.update(|s| s.current_version = current_version)?;
        self.events.emit(DeployEvent::Started {
            service: service.clone(),
            version: attempt.version.clone(),
            strategy,
        });

        self.set_phase(RolloutPhase::Preflight)?;
        let ctx = PreflightContext {
            version: &attempt.version,
            options: &attempt.options,
            config: &self.config,
        };
        let failures = attempt.pacer.guard(run_checks(&self.preflight, &ctx)).await?;
        if !failures.is_empty() {
            return Err(DeployError::PreflightFailed { failures });
        }

        self.set_phase(RolloutPhase::Migrating)?;
        let schema_before = self.migrations.current_schema_version()?;
        self.update(|s| s.schema_version_before = schema_before)?;
        let applied = self
            .migrations
            .run(&attempt.version, MigrationMode::Online, &attempt.pacer)
            .await?;
        attempt.progress.migrations_applied = applied;
        self.update(|s| s.migrations_applied = applied)?;

        if !attempt.options.toggles.is_empty() {
            let previous = self
                .toggles
                .apply_release(&attempt.version, &attempt.options.toggles)?;
            self.update(|s| s.previous_toggles = previous)?;
        }

        let mut outcome = match strategy {
            Strategy::BlueGreen => self.blue_green(attempt).await?,
            Strategy::Rolling => self.rolling(attempt).await?,
            Strategy::Canary => self.canary(attempt).await?,
        };

        self.set_phase(RolloutPhase::Validating)?;
        let sample = attempt
            .pacer
            .guard(self.metrics.current(&outcome.environment))
            .await??;
        let breaches = check_sample(&sample, &self.config.thresholds);
        if !breaches.is_empty() {
            return Err(DeployError::MetricsValidationFailed {
                stage: "post-deployment validation".to_string(),
                breaches,
            });
        }
        if outcome.metrics.is_empty() {
            outcome.metrics = aggregate_samples(&[sample]);
        }

        if let Some(old) = outcome.retire.take() {
            self.retire(&old).await?;
        }
        Ok(outcome)
    }

    /// Version running in the live environment, `"unknown"` when the
    /// provisioner cannot tell.
    async fn current_version(&self, attempt: &Attempt) -> Result<String, DeployError> {
        let lookup = attempt
            .pacer
            .guard(self.collaborators.provisioner.active_version(&attempt.live))
            .await?;
        Ok(match lookup {
            Ok(Some(version)) => version,
            Ok(None) => "unknown".to_string(),
            Err(e) => {
                warn!(environment = %attempt.live, error = %e, "could not look up live version");
                "unknown".to_string()
            }
        })
    }

    async fn retire(&self, environment: &str) -> Result<(), DeployError> {
        self.set_phase(RolloutPhase::Decommissioning)?;
        match self.collaborators.provisioner.decommission(environment).await {
            Ok(()) => info!(%environment, "previous environment decommissioned"),
            Err(e) => {
                warn!(%environment, error = %e, "decommission failed; leaving environment running");
                self.notify(
                    &self.config.notify.channel,
                    Severity::Warning,
                    &format!(
                        "{}: decommissioning {environment} failed: {e:#}",
                        self.config.service.name
                    ),
                )
                .await;
            }
        }
        Ok(())
    }

    fn succeed(
        &self,
        attempt: Attempt,
        strategy: Strategy,
        outcome: StrategyOutcome,
        duration: Duration,
    ) -> Result<DeployResult, DeployFailure> {
        let service = &self.config.service.name;
        let metrics = outcome.metrics.clone();
        let environment = outcome.environment.clone();
        let becomes_live = outcome.becomes_live;
        let version = attempt.version.clone();

        let recorded = self.update(|s| {
            s.in_progress = false;
            s.phase = RolloutPhase::Completed;
            s.current_version = version;
            s.metrics = metrics;
            if becomes_live {
                s.live_environment = environment;
            }
            s.candidate_environment = None;
            s.last_error = None;
            s.finished_at = Some(epoch_millis());
        });
        if let Err(error) = recorded {
            // The rollout itself landed; report the bookkeeping failure.
            return Err(DeployFailure {
                error,
                progress: attempt.progress,
            });
        }

        info!(
            %service,
            version = %attempt.version,
            environment = %outcome.environment,
            elapsed_ms = duration.as_millis() as u64,
            "deployment completed"
        );
        self.events.emit(DeployEvent::Completed {
            service: service.clone(),
            version: attempt.version.clone(),
            environment: outcome.environment.clone(),
            duration_ms: duration.as_millis() as u64,
            metrics: outcome.metrics.clone(),
        });

        Ok(DeployResult {
            version: attempt.version,
            strategy,
            environment: outcome.environment,
            metrics: outcome.metrics,
            duration,
            migrations_applied: attempt.progress.migrations_applied,
        })
    }

    async fn fail(&self, mut attempt: Attempt, mut error: DeployError) -> DeployFailure {
        let service = self.config.service.name.clone();
        error!(%service, version = %attempt.version, %error, "deployment failed");

        let snapshot = match self.state.get_deployment(&service) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(%service, error = %e, "could not read deployment record");
                None
            }
        };

        let eligible = error.rollback_eligibility() == RollbackEligibility::AutoRollbackEligible;
        match snapshot {
            Some(snapshot) if eligible && attempt.progress.traffic_touched => {
                let trigger = error.to_string();
                match self.rollback.rollback(&snapshot, &trigger).await {
                    Ok(report) => {
                        attempt.progress.rollback = RollbackOutcome::Completed {
                            to_environment: report.to_environment,
                            reverted: report.reverted,
                            skipped: report.skipped,
                        };
                    }
                    Err(e) => {
                        let cause = e.to_string();
                        attempt.progress.rollback = RollbackOutcome::Failed { cause: cause.clone() };
                        error = DeployError::RollbackFailed { trigger, cause };
                    }
                }
            }
            Some(snapshot) => self.restore_toggles(&snapshot),
            None => {}
        }

        let reason = error.to_string();
        let cleared = self.update(|s| {
            s.in_progress = false;
            if !s.phase.is_terminal() {
                s.phase = RolloutPhase::Failed {
                    reason: reason.clone(),
                };
            }
            s.candidate_environment = None;
            s.last_error = Some(reason.clone());
            s.finished_at = Some(epoch_millis());
        });
        if let Err(e) = cleared {
            error!(%service, error = %e, "could not clear in-progress flag");
        }

        self.events.emit(DeployEvent::Failed {
            service,
            version: attempt.version.clone(),
            error: reason,
        });
        DeployFailure {
            error,
            progress: attempt.progress,
        }
    }

    /// Undo a failed release's toggles when no full rollback ran.
    fn restore_toggles(&self, snapshot: &DeploymentState) {
        for (name, previous) in &snapshot.previous_toggles {
            if let Err(e) = self.toggles.restore(name, previous.clone()) {
                warn!(toggle = %name, error = %e, "could not restore feature toggle");
            }
        }
    }

    pub(crate) fn update<F>(&self, f: F) -> Result<DeploymentState, DeployError>
    where
        F: FnOnce(&mut DeploymentState),
    {
        Ok(self.state.update_deployment(&self.config.service.name, f)?)
    }

    pub(crate) fn set_phase(&self, phase: RolloutPhase) -> Result<(), DeployError> {
        debug!(service = %self.config.service.name, ?phase, "phase transition");
        self.update(|s| s.phase = phase)?;
        Ok(())
    }

    /// Record that this deployment is about to write traffic weights.
    pub(crate) fn touch_traffic(&self, attempt: &mut Attempt) -> Result<(), DeployError> {
        attempt.progress.traffic_touched = true;
        self.update(|s| s.traffic_touched = true)?;
        Ok(())
    }

    pub(crate) async fn provision(
        &self,
        attempt: &mut Attempt,
        environment: &str,
        capacity_percent: u8,
    ) -> Result<EnvironmentHandle, DeployError> {
        self.set_phase(RolloutPhase::Provisioning {
            environment: environment.to_string(),
        })?;
        self.update(|s| s.candidate_environment = Some(environment.to_string()))?;

        let mut env_vars = attempt.options.env.clone();
        env_vars.insert("ENVIRONMENT".to_string(), environment.to_string());
        env_vars.insert("VERSION".to_string(), attempt.version.clone());
        let request = ProvisionRequest {
            environment: environment.to_string(),
            version: attempt.version.clone(),
            env_vars,
            capacity_percent,
        };

        attempt.progress.provisioned.push(environment.to_string());
        let handle = attempt
            .pacer
            .guard(self.collaborators.provisioner.provision(&request))
            .await?
            .map_err(|source| DeployError::Provisioning {
                environment: environment.to_string(),
                source,
            })?;
        info!(%environment, version = %attempt.version, endpoints = handle.endpoints.len(), "environment provisioned");
        Ok(handle)
    }

    pub(crate) async fn wait_healthy(&self, attempt: &Attempt, handle: &EnvironmentHandle) -> Result<(), DeployError> {
        self.set_phase(RolloutPhase::HealthChecking {
            environment: handle.name.clone(),
        })?;
        match self.health.wait_for_healthy(&handle.endpoints, &attempt.pacer).await {
            Ok(rounds) => {
                info!(environment = %handle.name, rounds, "environment healthy");
                Ok(())
            }
            Err(HealthError::Timeout { waited, last_reason }) => Err(DeployError::HealthCheckTimeout {
                environment: handle.name.clone(),
                waited,
                last_reason,
            }),
            Err(HealthError::Interrupted(i)) => Err(i.into()),
        }
    }

    /// Watch `environment` for `duration`, flagging anomalies as they appear.
    pub(crate) async fn monitor(
        &self,
        attempt: &Attempt,
        environment: &str,
        duration: Duration,
    ) -> Result<MonitorReport, DeployError> {
        let report = self
            .metrics
            .monitor(
                environment,
                duration,
                self.timings.sample_interval,
                &attempt.pacer,
                self.anomaly_watcher(environment),
            )
            .await?;
        let aggregate = report.aggregate.clone();
        self.update(|s| s.metrics = aggregate)?;
        Ok(report)
    }

    fn anomaly_watcher(&self, environment: &str) -> impl FnMut(&MetricsSample) + Send + 'static {
        let events = self.events.clone();
        let notifier = self.collaborators.notifier.clone();
        let channel = self.config.notify.channel.clone();
        let service = self.config.service.name.clone();
        let environment = environment.to_string();
        let limits = self.config.anomaly;

        move |sample: &MetricsSample| {
            let breaches = check_sample(sample, &limits);
            if breaches.is_empty() {
                return;
            }
            let summary = breach_summary(&breaches);
            warn!(%service, %environment, %summary, "metrics anomaly");
            events.emit(DeployEvent::Anomaly {
                service: service.clone(),
                environment: environment.clone(),
                sample: *sample,
                breaches,
            });

            let notifier = notifier.clone();
            let channel = channel.clone();
            let message = format!("{service}: anomaly on {environment}: {summary}");
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&channel, Severity::Warning, &message).await {
                    warn!(error = %e, "anomaly notification failed");
                }
            });
        }
    }

    /// Send a notification; failures are logged and otherwise ignored.
    pub(crate) async fn notify(&self, channel: &str, severity: Severity, message: &str) {
        if let Err(e) = self.collaborators.notifier.notify(channel, severity, message).await {
            warn!(%channel, error = %e, "notification failed");
        }
    }
}
