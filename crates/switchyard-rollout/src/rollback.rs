//! RollbackCoordinator — put a failed deployment's changes back.
//!
//! Traffic goes back to the environment that was live when the deploy
//! started in a single weight write. Migrations applied by the deploy are
//! reverted newest first; ones without a down statement are skipped with
//! a warning. Toggles the release rewrote are restored. A rollback that
//! fails is escalated and never retried automatically.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use switchyard_core::{Severity, epoch_millis};
use switchyard_migrate::{MigrateError, MigrationRunner};
use switchyard_state::{DeploymentState, RolloutPhase, StateError, StateStore, TrafficWeights};
use switchyard_toggle::{FeatureToggleStore, ToggleError};
use switchyard_traffic::{TrafficError, TrafficRouter};

use crate::collaborators::Notifier;
use crate::events::{DeployEvent, EventBus};

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("restoring traffic to {environment}: {source}")]
    Traffic {
        environment: String,
        #[source]
        source: TrafficError,
    },

    #[error("reverting migrations: {0}")]
    Migrations(#[from] MigrateError),

    #[error("restoring feature toggles: {0}")]
    Toggles(#[from] ToggleError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// What a successful rollback did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub to_environment: String,
    /// Migration versions whose down statement ran.
    pub reverted: Vec<String>,
    /// Migration versions left in place for lack of a down statement.
    pub skipped: Vec<String>,
}

pub struct RollbackCoordinator {
    state: StateStore,
    traffic: Arc<TrafficRouter>,
    migrations: Arc<MigrationRunner>,
    toggles: FeatureToggleStore,
    notifier: Arc<dyn Notifier>,
    events: EventBus,
    channel: String,
    escalation_channel: String,
}

impl RollbackCoordinator {
    pub fn new(
        state: StateStore,
        traffic: Arc<TrafficRouter>,
        migrations: Arc<MigrationRunner>,
        toggles: FeatureToggleStore,
        notifier: Arc<dyn Notifier>,
        events: EventBus,
    ) -> Self {
        Self {
            state,
            traffic,
            migrations,
            toggles,
            notifier,
            events,
            channel: "deployments".to_string(),
            escalation_channel: "oncall".to_string(),
        }
    }

    /// Where routine and escalation notifications go.
    pub fn with_channels(mut self, channel: &str, escalation_channel: &str) -> Self {
        self.channel = channel.to_string();
        self.escalation_channel = escalation_channel.to_string();
        self
    }

    /// Roll `deployment` back after `trigger` failed it.
    ///
    /// Clears the in-progress flag either way. Not bounded by the
    /// deployment's pacer: a rollback is never cancelled halfway.
    pub async fn rollback(
        &self,
        deployment: &DeploymentState,
        trigger: &str,
    ) -> Result<RollbackReport, RollbackError> {
        let service = &deployment.service;
        let live = &deployment.live_environment;
        warn!(%service, from = %deployment.target_version, to = %deployment.current_version, %trigger, "rolling back");
        self.notify(
            &self.channel,
            Severity::Warning,
            &format!(
                "{service}: rolling back {} to {} on {live}: {trigger}",
                deployment.target_version, deployment.current_version
            ),
        )
        .await;

        let result = match self.state.update_deployment(service, |s| s.phase = RolloutPhase::RollingBack) {
            Ok(_) => self.restore(deployment).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(report) => {
                let phase = RolloutPhase::Failed {
                    reason: format!("rolled back to {live}: {trigger}"),
                };
                // Traffic is already back on the live environment at this point.
                if let Err(e) = self.finish(service, phase) {
                    error!(%service, error = %e, "rollback applied but its record could not be updated");
                }
                info!(%service, to = %live, reverted = report.reverted.len(), skipped = report.skipped.len(), "rollback complete");
                self.events.emit(DeployEvent::RollbackCompleted {
                    service: service.clone(),
                    from: deployment.target_version.clone(),
                    to: deployment.current_version.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                let cause = e.to_string();
                error!(%service, error = %cause, "rollback failed; manual intervention required");
                if let Err(finish) = self.finish(service, RolloutPhase::RollbackFailed { reason: cause.clone() }) {
                    error!(%service, error = %finish, "could not record failed rollback");
                }
                self.notify(
                    &self.escalation_channel,
                    Severity::Critical,
                    &format!(
                        "{service}: rollback of {} failed: {cause}. Manual intervention required.",
                        deployment.target_version
                    ),
                )
                .await;
                self.events.emit(DeployEvent::RollbackFailed {
                    service: service.clone(),
                    error: cause,
                });
                Err(e)
            }
        }
    }

    async fn restore(&self, deployment: &DeploymentState) -> Result<RollbackReport, RollbackError> {
        let live = &deployment.live_environment;

        let current = self
            .traffic
            .get_weights_or(&deployment.route, live)
            .map_err(|source| RollbackError::Traffic {
                environment: live.clone(),
                source,
            })?;
        let mut weights = TrafficWeights::all_to(live);
        for env in current.environments() {
            if env != live.as_str() {
                weights.set(env, 0);
            }
        }
        self.traffic
            .set_weights(&deployment.route, weights)
            .await
            .map_err(|source| RollbackError::Traffic {
                environment: live.clone(),
                source,
            })?;

        let (reverted, skipped) = if deployment.migrations_applied > 0 {
            let report = self
                .migrations
                .revert(
                    deployment.schema_version_before.as_deref(),
                    &deployment.target_version,
                )
                .await?;
            (report.reverted, report.skipped)
        } else {
            (Vec::new(), Vec::new())
        };

        for (name, previous) in &deployment.previous_toggles {
            self.toggles.restore(name, previous.clone())?;
        }

        Ok(RollbackReport {
            to_environment: live.clone(),
            reverted,
            skipped,
        })
    }

    fn finish(&self, service: &str, phase: RolloutPhase) -> Result<(), RollbackError> {
        self.state.update_deployment(service, |s| {
            s.in_progress = false;
            s.phase = phase;
            s.finished_at = Some(epoch_millis());
        })?;
        Ok(())
    }

    async fn notify(&self, channel: &str, severity: Severity, message: &str) {
        if let Err(e) = self.notifier.notify(channel, severity, message).await {
            warn!(%channel, error = %e, "notification failed");
        }
    }
}
