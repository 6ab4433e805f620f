//! switchyard-toggle — feature toggles tied to deployments.
//!
//! [`FeatureToggleStore`] persists per-feature rollout configuration in the
//! state store, publishes every change on a broadcast channel, and answers
//! `is_enabled` with a deterministic evaluation: a SHA-256 bucket of the
//! serialized caller context for partial rollouts, otherwise first-match
//! targeting rules.

pub mod eval;
pub mod store;

pub use eval::{Context, context_bucket, evaluate, rule_matches};
pub use store::{FeatureToggleStore, ToggleChange, ToggleError};
