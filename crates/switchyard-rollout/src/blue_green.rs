//! Blue-green: bring up the idle environment, then move traffic to it.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};

use switchyard_core::{Pacer, Thresholds};
use switchyard_metrics::{Breach, MetricsGateway, check_aggregate, check_sample};
use switchyard_state::{RolloutPhase, TrafficWeights};
use switchyard_traffic::{StepOutcome, StepValidator};

use crate::error::DeployError;
use crate::orchestrator::{Attempt, RolloutOrchestrator, StrategyOutcome};

impl RolloutOrchestrator {
    pub(crate) async fn blue_green(&self, attempt: &mut Attempt) -> Result<StrategyOutcome, DeployError> {
        let svc = &self.config.service;
        let live = attempt.live.clone();
        let target = if live == svc.candidate_environment {
            svc.stable_environment.clone()
        } else {
            svc.candidate_environment.clone()
        };

        let handle = self.provision(attempt, &target, 100).await?;
        self.wait_healthy(attempt, &handle).await?;

        self.set_phase(RolloutPhase::SmokeTesting)?;
        attempt
            .pacer
            .guard(self.collaborators.smoke_tests.run(&handle))
            .await?
            .map_err(|e| DeployError::SmokeTestFailed {
                environment: target.clone(),
                reason: format!("{e:#}"),
            })?;

        self.set_phase(RolloutPhase::SwitchingTraffic)?;
        let from = self.traffic.get_weights_or(&svc.route, &live)?;
        let mut to = TrafficWeights::all_to(&target);
        for env in from.environments() {
            if env != target {
                to.set(env, 0);
            }
        }

        attempt.pacer.check()?;
        self.touch_traffic(attempt)?;
        if attempt.options.gradual_switch {
            let validator = MetricsStepValidator::new(
                &self.metrics,
                &target,
                &self.config.thresholds,
                &attempt.pacer,
            );
            let outcome = self
                .traffic
                .step_towards(
                    &svc.route,
                    &from,
                    &to,
                    self.config.monitoring.switch_steps,
                    attempt.options.switch_duration(),
                    &attempt.pacer,
                    &validator,
                )
                .await?;
            if let StepOutcome::Halted { step, weights } = outcome {
                warn!(environment = %target, step, %weights, "gradual switch halted");
                attempt.pacer.check()?;
                return Err(validator.into_error(format!("traffic switch step {step}")));
            }
        } else {
            self.traffic.set_weights(&svc.route, to).await?;
        }
        info!(from = %live, to = %target, "traffic switched");

        self.set_phase(RolloutPhase::Monitoring)?;
        let report = self
            .monitor(attempt, &target, attempt.options.monitor_duration())
            .await?;
        let breaches = check_aggregate(&report.aggregate, &self.config.thresholds);
        if !breaches.is_empty() {
            return Err(DeployError::MetricsValidationFailed {
                stage: "monitoring".to_string(),
                breaches,
            });
        }

        Ok(StrategyOutcome {
            environment: target,
            metrics: report.aggregate,
            becomes_live: true,
            retire: (!attempt.options.keep_blue).then_some(live),
        })
    }
}

/// Checks one fresh sample of the target after every switch step.
struct MetricsStepValidator<'a> {
    metrics: &'a MetricsGateway,
    environment: &'a str,
    thresholds: &'a Thresholds,
    pacer: &'a Pacer,
    breaches: Mutex<Vec<Breach>>,
    query_error: Mutex<Option<anyhow::Error>>,
}

impl<'a> MetricsStepValidator<'a> {
    fn new(
        metrics: &'a MetricsGateway,
        environment: &'a str,
        thresholds: &'a Thresholds,
        pacer: &'a Pacer,
    ) -> Self {
        Self {
            metrics,
            environment,
            thresholds,
            pacer,
            breaches: Mutex::new(Vec::new()),
            query_error: Mutex::new(None),
        }
    }

    /// The error explaining why validation stopped the switch.
    fn into_error(self, stage: String) -> DeployError {
        let query_error = self.query_error.into_inner().unwrap_or_else(|p| p.into_inner());
        if let Some(source) = query_error {
            return DeployError::Collaborator {
                step: "metrics query",
                source,
            };
        }
        DeployError::MetricsValidationFailed {
            stage,
            breaches: self.breaches.into_inner().unwrap_or_else(|p| p.into_inner()),
        }
    }
}

#[async_trait]
impl StepValidator for MetricsStepValidator<'_> {
    async fn validate(&self, step: u32, weights: &TrafficWeights) -> bool {
        let sample = match self.pacer.guard(self.metrics.current(self.environment)).await {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                warn!(environment = %self.environment, step, error = %e, "metrics query failed during switch");
                *self.query_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.into());
                return false;
            }
            // The caller notices the interruption on its own pacer.
            Err(_) => return false,
        };

        let breaches = check_sample(&sample, self.thresholds);
        if breaches.is_empty() {
            return true;
        }
        warn!(environment = %self.environment, step, %weights, breaches = breaches.len(), "switch step breached thresholds");
        *self.breaches.lock().unwrap_or_else(|p| p.into_inner()) = breaches;
        false
    }
}
