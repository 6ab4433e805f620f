//! Rolling: patch the platform workload and wait for it to converge.
//!
//! The platform does its own instance replacement and load balancing, so
//! no traffic weights are written. A failed or stuck rollout is reported;
//! reverting to the previous revision is left to the operator.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use switchyard_core::Interrupted;
use switchyard_state::RolloutPhase;

use crate::collaborators::{WorkloadPatch, WorkloadStatus};
use crate::error::DeployError;
use crate::orchestrator::{Attempt, RolloutOrchestrator, StrategyOutcome};

impl RolloutOrchestrator {
    pub(crate) async fn rolling(&self, attempt: &mut Attempt) -> Result<StrategyOutcome, DeployError> {
        let rolling = &self.config.rolling;
        let workload = rolling.workload.clone();
        let patch = WorkloadPatch {
            name: workload.clone(),
            namespace: rolling.namespace.clone(),
            image: format!("{}:{}", rolling.image, attempt.version),
            max_surge_percent: attempt
                .options
                .max_surge_percent
                .unwrap_or(rolling.max_surge_percent),
            max_unavailable_percent: attempt
                .options
                .max_unavailable_percent
                .unwrap_or(rolling.max_unavailable_percent),
        };

        self.set_phase(RolloutPhase::PatchingWorkload)?;
        attempt
            .pacer
            .guard(self.collaborators.workloads.patch_workload(&patch))
            .await?
            .map_err(|e| DeployError::RolloutFailed {
                workload: workload.clone(),
                reason: format!("patch rejected: {e:#}"),
            })?;
        attempt
            .progress
            .provisioned
            .push(format!("{}/{}", patch.namespace, patch.name));
        info!(%workload, image = %patch.image, surge = patch.max_surge_percent, unavailable = patch.max_unavailable_percent, "workload patched");

        self.set_phase(RolloutPhase::AwaitingRollout)?;
        let mut statuses = attempt
            .pacer
            .guard(
                self.collaborators
                    .workloads
                    .watch_rollout(&patch.name, &patch.namespace),
            )
            .await?
            .map_err(|e| DeployError::RolloutFailed {
                workload: workload.clone(),
                reason: format!("cannot watch rollout: {e:#}"),
            })?;

        let watch = attempt.pacer.clone().with_timeout(self.timings.rollout_timeout);
        let mut last = WorkloadStatus {
            available: 0,
            updated: 0,
            total: 0,
            failure: None,
        };
        loop {
            match watch.guard(statuses.next()).await {
                Ok(Some(Ok(status))) => {
                    debug!(%workload, available = status.available, updated = status.updated, total = status.total, "rollout status");
                    if let Some(reason) = &status.failure {
                        return Err(DeployError::RolloutFailed {
                            workload,
                            reason: reason.clone(),
                        });
                    }
                    let converged = status.converged();
                    last = status;
                    if converged {
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    return Err(DeployError::RolloutFailed {
                        workload,
                        reason: format!("status watch failed: {e:#}"),
                    });
                }
                Ok(None) => {
                    return Err(DeployError::RolloutFailed {
                        workload,
                        reason: "status stream ended before the rollout converged".to_string(),
                    });
                }
                Err(Interrupted::DeadlineExceeded) if attempt.pacer.check().is_ok() => {
                    warn!(%workload, available = last.available, total = last.total, "rollout timed out");
                    return Err(DeployError::RolloutTimeout {
                        workload,
                        available: last.available,
                        total: last.total,
                    });
                }
                Err(interrupted) => return Err(interrupted.into()),
            }
        }
        info!(%workload, replicas = last.total, "rollout converged");

        Ok(StrategyOutcome {
            environment: workload,
            metrics: BTreeMap::new(),
            becomes_live: false,
            retire: None,
        })
    }
}
