//! FeatureToggleStore — persisted toggles with change notification.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use switchyard_core::epoch_millis;
use switchyard_state::{FeatureToggle, RuleOperator, StateError, StateStore, ToggleConfig};

use crate::eval::{Context, evaluate};

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("rollout percentage must be 0-100, got {0}")]
    InvalidPercentage(u8),

    #[error("rule on {attribute:?}: `in` needs an array value")]
    InvalidRule { attribute: String },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Published on every write. `toggle` is `None` when the toggle was removed.
///
/// Delivery is at-least-once; subscribers should key on `version` and
/// ignore revisions older than the one they hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToggleChange {
    pub name: String,
    pub version: u64,
    pub toggle: Option<FeatureToggle>,
}

#[derive(Clone)]
pub struct FeatureToggleStore {
    state: StateStore,
    changes: broadcast::Sender<ToggleChange>,
}

impl FeatureToggleStore {
    pub fn new(state: StateStore) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { state, changes }
    }

    /// Receive every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<ToggleChange> {
        self.changes.subscribe()
    }

    fn publish(&self, change: ToggleChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    fn next_version(&self, name: &str) -> Result<u64, ToggleError> {
        Ok(self.state.next_toggle_revision(name)?)
    }

    /// Persist `config` for `name` and publish the change.
    ///
    /// `release` records the deployment version that wrote it, if any.
    pub fn set_toggle(
        &self,
        name: &str,
        config: ToggleConfig,
        release: Option<&str>,
    ) -> Result<FeatureToggle, ToggleError> {
        validate(&config)?;
        let toggle = FeatureToggle {
            name: name.to_string(),
            enabled: config.enabled,
            rollout_percentage: config.rollout_percentage,
            targeting_rules: config.targeting_rules,
            version: self.next_version(name)?,
            release: release.map(str::to_string),
            updated_at: epoch_millis(),
        };
        self.state.put_toggle(&toggle)?;
        info!(
            %name,
            enabled = toggle.enabled,
            percentage = toggle.rollout_percentage,
            version = toggle.version,
            "feature toggle set"
        );
        self.publish(ToggleChange {
            name: name.to_string(),
            version: toggle.version,
            toggle: Some(toggle.clone()),
        });
        Ok(toggle)
    }

    pub fn get_toggle(&self, name: &str) -> Result<Option<FeatureToggle>, ToggleError> {
        Ok(self.state.get_toggle(name)?)
    }

    pub fn list(&self) -> Result<Vec<FeatureToggle>, ToggleError> {
        Ok(self.state.list_toggles()?)
    }

    /// Remove a toggle. Returns true if it existed.
    pub fn delete_toggle(&self, name: &str) -> Result<bool, ToggleError> {
        if self.state.get_toggle(name)?.is_none() {
            return Ok(false);
        }
        let version = self.next_version(name)?;
        self.state.delete_toggle(name)?;
        self.publish(ToggleChange {
            name: name.to_string(),
            version,
            toggle: None,
        });
        Ok(true)
    }

    /// Put back a snapshot taken before a deployment touched `name`.
    ///
    /// `None` removes the toggle. Restored toggles get a fresh version so
    /// subscribers see the rollback as a newer revision.
    pub fn restore(&self, name: &str, previous: Option<FeatureToggle>) -> Result<(), ToggleError> {
        match previous {
            Some(prev) => {
                let restored = FeatureToggle {
                    version: self.next_version(name)?,
                    updated_at: epoch_millis(),
                    ..prev
                };
                self.state.put_toggle(&restored)?;
                debug!(%name, version = restored.version, "feature toggle restored");
                self.publish(ToggleChange {
                    name: name.to_string(),
                    version: restored.version,
                    toggle: Some(restored),
                });
            }
            None => {
                self.delete_toggle(name)?;
                debug!(%name, "feature toggle removed on restore");
            }
        }
        Ok(())
    }

    /// Apply a release's toggles and return what each looked like before.
    pub fn apply_release(
        &self,
        release: &str,
        toggles: &BTreeMap<String, ToggleConfig>,
    ) -> Result<BTreeMap<String, Option<FeatureToggle>>, ToggleError> {
        for config in toggles.values() {
            validate(config)?;
        }
        let mut previous = BTreeMap::new();
        for (name, config) in toggles {
            previous.insert(name.clone(), self.state.get_toggle(name)?);
            self.set_toggle(name, config.clone(), Some(release))?;
        }
        Ok(previous)
    }

    /// Whether `name` is on for `context`. Absent toggles are off.
    pub fn is_enabled(&self, name: &str, context: &Context) -> Result<bool, ToggleError> {
        Ok(self
            .state
            .get_toggle(name)?
            .is_some_and(|toggle| evaluate(&toggle, context)))
    }
}

fn validate(config: &ToggleConfig) -> Result<(), ToggleError> {
    if config.rollout_percentage > 100 {
        return Err(ToggleError::InvalidPercentage(config.rollout_percentage));
    }
    for rule in config.targeting_rules.iter().flatten() {
        if rule.operator == RuleOperator::In && !rule.value.is_array() {
            return Err(ToggleError::InvalidRule {
                attribute: rule.attribute.clone(),
            });
        }
    }
    Ok(())
}
