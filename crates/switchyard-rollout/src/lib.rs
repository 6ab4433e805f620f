//! switchyard-rollout — zero-downtime deployment orchestration.
//!
//! [`RolloutOrchestrator::deploy`] runs one deployment of a service end to
//! end: preflight checks, schema migrations, release toggles, then one of
//! three strategies, and a final metrics check.
//!
//! # Strategies
//!
//! ```text
//! blue-green  provision idle env → health → smoke → switch (flip or steps) → monitor → retire old
//! canary      provision canary → health → N% traffic → observe → stages [25,50,75,100] with bake time
//! rolling     patch workload image → watch platform rollout until converged or timed out
//! ```
//!
//! Every wait goes through a [`Pacer`](switchyard_core::Pacer), so the
//! deployment deadline and caller cancellation interrupt it. Errors raised
//! after traffic moved are classified by
//! [`DeployError::rollback_eligibility`]; eligible ones hand the deployment
//! to the [`RollbackCoordinator`].

pub mod collaborators;
pub mod error;
pub mod events;
pub mod options;
pub mod orchestrator;
pub mod preflight;
pub mod rollback;

mod blue_green;
mod canary;
mod rolling;

pub use collaborators::{
    Collaborators, ComputeProvisioner, EnvironmentHandle, LogNotifier, Notifier, ProbeSmokeTests, ProvisionRequest,
    SmokeTester, WorkloadOrchestrator, WorkloadPatch, WorkloadStatus,
};
pub use error::{DeployError, DeployFailure, PreflightFailure, Progress, RollbackEligibility, RollbackOutcome};
pub use events::{DeployEvent, EventBus};
pub use options::DeployOptions;
pub use orchestrator::{DeployResult, RolloutOrchestrator};
pub use preflight::{
    ConfigurationCheck, DatabaseConnectivityCheck, DependencyCheck, DiskSpaceCheck, PreflightCheck, PreflightContext,
    SecretsCheck, default_checks, run_checks,
};
pub use rollback::{RollbackCoordinator, RollbackError, RollbackReport};
