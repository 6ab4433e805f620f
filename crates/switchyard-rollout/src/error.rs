//! Deployment errors and their rollback classification.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use switchyard_core::{ConfigError, Interrupted};
use switchyard_metrics::{Breach, MetricsError};
use switchyard_migrate::MigrateError;
use switchyard_state::StateError;
use switchyard_toggle::ToggleError;
use switchyard_traffic::TrafficError;

/// One failing preflight check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightFailure {
    pub check: String,
    pub reason: String,
}

impl fmt::Display for PreflightFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.check, self.reason)
    }
}

/// Everything `deploy` can fail with. Exactly one is returned per call.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deployment of {service} already in progress (target {version})")]
    DeploymentInProgress { service: String, version: String },

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("preflight checks failed: {}", check_names(failures))]
    PreflightFailed { failures: Vec<PreflightFailure> },

    #[error("migration {migration} failed: {cause}")]
    MigrationFailed { migration: String, cause: String },

    #[error("provisioning {environment} failed: {source}")]
    Provisioning {
        environment: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{environment} not healthy after {waited:?}: {last_reason}")]
    HealthCheckTimeout {
        environment: String,
        waited: Duration,
        last_reason: String,
    },

    #[error("smoke tests failed on {environment}: {reason}")]
    SmokeTestFailed { environment: String, reason: String },

    #[error("traffic switch failed: {0}")]
    TrafficSwitch(TrafficError),

    #[error("metrics validation failed during {stage}: {}", breach_summary(breaches))]
    MetricsValidationFailed { stage: String, breaches: Vec<Breach> },

    #[error("canary failed: {reason}")]
    CanaryFailed { reason: String, breaches: Vec<Breach> },

    #[error("progressive rollout failed at stage {stage}% (traffic held at {held_at}%): {reason}")]
    ProgressiveRolloutFailed { stage: u8, held_at: u8, reason: String },

    #[error("rollout of workload {workload} failed: {reason}")]
    RolloutFailed { workload: String, reason: String },

    #[error("rollout of workload {workload} timed out with {available}/{total} available")]
    RolloutTimeout {
        workload: String,
        available: u32,
        total: u32,
    },

    #[error("{step} failed: {source}")]
    Collaborator {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("deployment cancelled")]
    Cancelled,

    #[error("deployment deadline exceeded")]
    DeadlineExceeded,

    #[error("rollback after {trigger} failed: {cause}")]
    RollbackFailed { trigger: String, cause: String },
}

/// What the orchestrator should do about a failed deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackEligibility {
    /// Nothing live was changed; clearing the record is enough.
    NotNeeded,
    /// Traffic may point at the new version; restore the previous one.
    AutoRollbackEligible,
    /// The strategy already restored a safe traffic split itself.
    HandledByStrategy,
}

impl DeployError {
    pub fn rollback_eligibility(&self) -> RollbackEligibility {
        match self {
            DeployError::MetricsValidationFailed { .. }
            | DeployError::TrafficSwitch(_)
            | DeployError::Cancelled
            | DeployError::DeadlineExceeded
            | DeployError::Collaborator { .. } => RollbackEligibility::AutoRollbackEligible,
            DeployError::CanaryFailed { .. } | DeployError::ProgressiveRolloutFailed { .. } => {
                RollbackEligibility::HandledByStrategy
            }
            _ => RollbackEligibility::NotNeeded,
        }
    }
}

impl From<Interrupted> for DeployError {
    fn from(err: Interrupted) -> Self {
        match err {
            Interrupted::Cancelled => DeployError::Cancelled,
            Interrupted::DeadlineExceeded => DeployError::DeadlineExceeded,
        }
    }
}

impl From<TrafficError> for DeployError {
    fn from(err: TrafficError) -> Self {
        match err {
            TrafficError::Interrupted(i) => i.into(),
            other => DeployError::TrafficSwitch(other),
        }
    }
}

impl From<MetricsError> for DeployError {
    fn from(err: MetricsError) -> Self {
        match err {
            MetricsError::Interrupted(i) => i.into(),
            other => DeployError::Collaborator {
                step: "metrics query",
                source: other.into(),
            },
        }
    }
}

impl From<MigrateError> for DeployError {
    fn from(err: MigrateError) -> Self {
        match err {
            MigrateError::MigrationFailed { migration, cause } => {
                DeployError::MigrationFailed { migration, cause }
            }
            MigrateError::InvalidVersion { version, reason } => {
                DeployError::InvalidVersion(format!("{version}: {reason}"))
            }
            MigrateError::Interrupted(i) => i.into(),
            MigrateError::State(e) => DeployError::State(e),
            other => DeployError::Collaborator {
                step: "migrations",
                source: other.into(),
            },
        }
    }
}

impl From<ToggleError> for DeployError {
    fn from(err: ToggleError) -> Self {
        match err {
            ToggleError::State(e) => DeployError::State(e),
            other => DeployError::Collaborator {
                step: "feature toggles",
                source: other.into(),
            },
        }
    }
}

fn check_names(failures: &[PreflightFailure]) -> String {
    failures
        .iter()
        .map(|f| f.check.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn breach_summary(breaches: &[Breach]) -> String {
    breaches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// How the automatic rollback went, if one was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    NotAttempted,
    Completed {
        to_environment: String,
        reverted: Vec<String>,
        skipped: Vec<String>,
    },
    Failed {
        cause: String,
    },
}

/// What a failed deployment had already changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub migrations_applied: u32,
    pub provisioned: Vec<String>,
    pub traffic_touched: bool,
    pub rollback: RollbackOutcome,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            migrations_applied: 0,
            provisioned: Vec::new(),
            traffic_touched: false,
            rollback: RollbackOutcome::NotAttempted,
        }
    }
}

/// A failed `deploy`: the error plus what had been mutated.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DeployFailure {
    #[source]
    pub error: DeployError,
    pub progress: Progress,
}

impl DeployFailure {
    /// A failure that happened before anything was mutated.
    pub fn untouched(error: DeployError) -> Self {
        Self {
            error,
            progress: Progress::default(),
        }
    }
}
