//! Canary: a small slice of traffic first, then progressive stages.

use tracing::{info, warn};

use switchyard_metrics::check_aggregate;
use switchyard_state::{RolloutPhase, TrafficWeights};

use crate::error::{DeployError, breach_summary};
use crate::orchestrator::{Attempt, RolloutOrchestrator, StrategyOutcome};

impl RolloutOrchestrator {
    pub(crate) async fn canary(&self, attempt: &mut Attempt) -> Result<StrategyOutcome, DeployError> {
        let svc = &self.config.service;
        let route = svc.route.as_str();
        let live = attempt.live.clone();
        let canary = if live == svc.canary_environment {
            svc.stable_environment.clone()
        } else {
            svc.canary_environment.clone()
        };
        let percentage = attempt.options.canary_percentage;

        let handle = self.provision(attempt, &canary, percentage).await?;
        self.wait_healthy(attempt, &handle).await?;

        self.set_phase(RolloutPhase::SwitchingTraffic)?;
        attempt.pacer.check()?;
        self.touch_traffic(attempt)?;
        self.traffic
            .set_weights(route, TrafficWeights::split(&live, &canary, percentage))
            .await?;
        info!(%canary, percentage, "canary receiving traffic");

        self.set_phase(RolloutPhase::CanaryObserving)?;
        let report = self
            .monitor(attempt, &canary, attempt.options.canary_duration())
            .await?;
        let breaches = check_aggregate(&report.aggregate, &self.config.thresholds);
        if !breaches.is_empty() {
            let reason = breach_summary(&breaches);
            warn!(%canary, %reason, "canary failed validation");
            self.remove_canary(route, &live, &canary).await?;
            return Err(DeployError::CanaryFailed { reason, breaches });
        }

        let mut last_good = percentage;
        let mut metrics = report.aggregate;
        let stages = attempt.options.stages.clone();
        for stage in stages {
            self.set_phase(RolloutPhase::Promoting { stage })?;
            attempt.pacer.check()?;
            self.traffic
                .set_weights(route, TrafficWeights::split(&live, &canary, stage))
                .await?;

            let report = self
                .monitor(attempt, &canary, attempt.options.stage_duration())
                .await?;
            let breaches = check_aggregate(&report.aggregate, &self.config.thresholds);
            if !breaches.is_empty() {
                let reason = breach_summary(&breaches);
                warn!(%canary, stage, held_at = last_good, %reason, "progressive stage failed");
                self.traffic
                    .set_weights(route, TrafficWeights::split(&live, &canary, last_good))
                    .await?;
                return Err(DeployError::ProgressiveRolloutFailed {
                    stage,
                    held_at: last_good,
                    reason,
                });
            }
            info!(%canary, stage, "stage validated");
            last_good = stage;
            metrics = report.aggregate;

            if stage < 100 {
                self.set_phase(RolloutPhase::Baking { stage })?;
                attempt.pacer.sleep(self.timings.bake_time).await?;
            }
        }

        Ok(StrategyOutcome {
            environment: canary,
            metrics,
            becomes_live: last_good == 100,
            retire: None,
        })
    }

    /// Send everything back to `live` and tear the canary down.
    ///
    /// A failed weight reset is returned; a failed teardown is only logged.
    async fn remove_canary(&self, route: &str, live: &str, canary: &str) -> Result<(), DeployError> {
        self.traffic
            .set_weights(route, TrafficWeights::all_to(live).with(canary, 0))
            .await?;
        self.set_phase(RolloutPhase::Decommissioning)?;
        if let Err(e) = self.collaborators.provisioner.decommission(canary).await {
            warn!(%canary, error = %e, "canary teardown failed");
        }
        Ok(())
    }
}
