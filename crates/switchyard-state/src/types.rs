//! Domain types for the Switchyard state store.
//!
//! These types represent the persisted state of deployments, schema
//! migrations, feature toggles, and traffic weights. All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use switchyard_core::Strategy;

// ── Deployment ─────────────────────────────────────────────────────

/// The single deployment record kept per logical service.
///
/// At most one record per service has `in_progress = true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentState {
    pub service: String,
    pub in_progress: bool,
    /// Version serving traffic when the deployment started.
    pub current_version: String,
    pub target_version: String,
    /// Unix timestamp (milliseconds) when the deployment started.
    pub start_time: u64,
    pub strategy: Strategy,
    pub phase: RolloutPhase,
    /// Aggregated metrics from the most recent monitoring window.
    #[serde(default)]
    pub metrics: BTreeMap<String, AggregatedMetric>,
    /// Environment taking live traffic. Rollback restores this one; a
    /// successful blue-green or canary deploy replaces it.
    pub live_environment: String,
    /// Environment the new version is being brought up in, once chosen.
    #[serde(default)]
    pub candidate_environment: Option<String>,
    /// Route / listener whose weights this deployment shifts.
    pub route: String,
    /// Highest completed schema version before migrations ran.
    #[serde(default)]
    pub schema_version_before: Option<String>,
    #[serde(default)]
    pub migrations_applied: u32,
    /// Whether any traffic weight has been written by this deployment.
    #[serde(default)]
    pub traffic_touched: bool,
    /// Prior record of each feature toggle this deployment rewrote
    /// (`None` when the toggle did not exist).
    #[serde(default)]
    pub previous_toggles: BTreeMap<String, Option<FeatureToggle>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub finished_at: Option<u64>,
}

/// Where a deployment currently is. Persisted on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RolloutPhase {
    Pending,
    Preflight,
    Migrating,
    Provisioning { environment: String },
    HealthChecking { environment: String },
    SmokeTesting,
    SwitchingTraffic,
    Monitoring,
    CanaryObserving,
    Promoting { stage: u8 },
    Baking { stage: u8 },
    Decommissioning,
    PatchingWorkload,
    AwaitingRollout,
    Validating,
    RollingBack,
    Completed,
    Failed { reason: String },
    /// Rollback itself failed; a human has to reconcile the service.
    RollbackFailed { reason: String },
}

impl RolloutPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RolloutPhase::Completed | RolloutPhase::Failed { .. } | RolloutPhase::RollbackFailed { .. }
        )
    }
}

/// Summary of one metric over a monitoring window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AggregatedMetric {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

// ── Migrations ────────────────────────────────────────────────────

/// A single versioned schema change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Migration {
    /// Semver version; migrations apply in ascending order.
    pub version: String,
    pub name: String,
    pub kind: MigrationKind,
    /// Explicit down statement. Structured kinds derive one when absent.
    #[serde(default)]
    pub down_sql: Option<String>,
    #[serde(default)]
    pub status: MigrationStatus,
    /// Unix timestamp (milliseconds) when the migration was marked completed.
    #[serde(default)]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The change a migration makes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationKind {
    AddColumn {
        table: String,
        column: String,
        data_type: String,
        /// SQL expression written into existing rows by the backfill.
        #[serde(default)]
        default_value: Option<String>,
        /// Constraints applied after backfill (e.g. `SET NOT NULL`).
        #[serde(default)]
        constraints: Vec<String>,
    },
    CreateIndex {
        table: String,
        index_name: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
    },
    Custom { up_sql: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl Migration {
    /// A registry entry waiting to be applied.
    pub fn pending(version: &str, name: &str, kind: MigrationKind) -> Self {
        Self {
            version: version.to_string(),
            name: name.to_string(),
            kind,
            down_sql: None,
            status: MigrationStatus::Pending,
            completed_at: None,
            error: None,
        }
    }

    pub fn with_down(mut self, down_sql: &str) -> Self {
        self.down_sql = Some(down_sql.to_string());
        self
    }

    /// Build the key for the migrations table.
    pub fn table_key(&self) -> String {
        self.version.clone()
    }
}

// ── Feature toggles ───────────────────────────────────────────────

/// Caller-supplied toggle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToggleConfig {
    pub enabled: bool,
    #[serde(default = "full_rollout")]
    pub rollout_percentage: u8,
    /// `None` targets everyone; an empty list targets nobody.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting_rules: Option<Vec<TargetingRule>>,
}

fn full_rollout() -> u8 {
    100
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rollout_percentage: 100,
            targeting_rules: None,
        }
    }
}

/// A persisted feature toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureToggle {
    pub name: String,
    pub enabled: bool,
    pub rollout_percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeting_rules: Option<Vec<TargetingRule>>,
    /// Monotonic revision; bumped on every write.
    pub version: u64,
    /// Deployment version that last wrote this toggle, if any.
    #[serde(default)]
    pub release: Option<String>,
    /// Unix timestamp (milliseconds) of the last write.
    pub updated_at: u64,
}

impl FeatureToggle {
    pub fn config(&self) -> ToggleConfig {
        ToggleConfig {
            enabled: self.enabled,
            rollout_percentage: self.rollout_percentage,
            targeting_rules: self.targeting_rules.clone(),
        }
    }
}

/// One `{attribute, operator, value}` targeting rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetingRule {
    pub attribute: String,
    pub operator: RuleOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    Contains,
    In,
}

// ── Traffic ───────────────────────────────────────────────────────

/// Percentage of a route's traffic sent to each named environment.
///
/// A distribution is only applied when its weights sum to exactly 100.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrafficWeights(BTreeMap<String, u8>);

impl TrafficWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// All traffic to one environment.
    pub fn all_to(environment: &str) -> Self {
        Self::new().with(environment, 100)
    }

    /// `percent` to `target`, the rest to `live`.
    pub fn split(live: &str, target: &str, percent: u8) -> Self {
        let percent = percent.min(100);
        Self::new().with(live, 100 - percent).with(target, percent)
    }

    pub fn with(mut self, environment: &str, weight: u8) -> Self {
        self.0.insert(environment.to_string(), weight);
        self
    }

    pub fn set(&mut self, environment: &str, weight: u8) {
        self.0.insert(environment.to_string(), weight);
    }

    /// Weight for an environment; absent environments receive nothing.
    pub fn get(&self, environment: &str) -> u8 {
        self.0.get(environment).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().map(|w| *w as u32).sum()
    }

    /// True when the weights account for all traffic.
    pub fn is_complete(&self) -> bool {
        self.total() == 100
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TrafficWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (env, weight) in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{env}={weight}")?;
            first = false;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<(S, u8)> for TrafficWeights {
    fn from_iter<I: IntoIterator<Item = (S, u8)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sums_to_hundred() {
        let w = TrafficWeights::split("blue", "green", 25);
        assert_eq!(w.get("blue"), 75);
        assert_eq!(w.get("green"), 25);
        assert!(w.is_complete());
        assert_eq!(w.to_string(), "blue=75 green=25");
    }

    #[test]
    fn missing_environment_weighs_zero() {
        let w = TrafficWeights::all_to("blue");
        assert_eq!(w.get("green"), 0);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn incomplete_distribution_detected() {
        let w: TrafficWeights = [("blue", 60u8), ("green", 30u8)].into_iter().collect();
        assert_eq!(w.total(), 90);
        assert!(!w.is_complete());
    }

    #[test]
    fn weights_serialize_as_plain_map() {
        let w = TrafficWeights::split("blue", "green", 10);
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"blue":90,"green":10}"#);
    }

    #[test]
    fn phase_serializes_tagged() {
        let json = serde_json::to_string(&RolloutPhase::Promoting { stage: 50 }).unwrap();
        assert_eq!(json, r#"{"phase":"promoting","stage":50}"#);
        assert!(RolloutPhase::Completed.is_terminal());
        assert!(!RolloutPhase::Monitoring.is_terminal());
    }

    #[test]
    fn migration_kind_is_tagged_by_type() {
        let m = Migration::pending(
            "1.2.0",
            "add_email",
            MigrationKind::AddColumn {
                table: "users".into(),
                column: "email".into(),
                data_type: "TEXT".into(),
                default_value: None,
                constraints: vec![],
            },
        );
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["kind"]["type"], "add_column");
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn toggle_config_defaults_to_full_rollout() {
        let cfg: ToggleConfig = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert_eq!(cfg.rollout_percentage, 100);
        assert!(cfg.targeting_rules.is_none());

        let empty: ToggleConfig = serde_json::from_str(r#"{"enabled": true, "targeting_rules": []}"#).unwrap();
        assert_eq!(empty.targeting_rules, Some(vec![]));
    }
}
