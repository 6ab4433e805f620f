//! Per-call deployment options.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use switchyard_core::Strategy;
use switchyard_state::ToggleConfig;

/// Knobs for one `deploy` call. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployOptions {
    /// `None` uses the service's configured default strategy.
    pub strategy: Option<Strategy>,
    /// Leave the previously live blue-green environment running.
    pub keep_blue: bool,
    /// Shift blue-green traffic in steps instead of one flip.
    pub gradual_switch: bool,
    pub switch_duration_ms: u64,
    pub monitor_duration_ms: u64,
    /// Share of traffic the canary receives, 1..=99.
    pub canary_percentage: u8,
    pub canary_duration_ms: u64,
    /// Progressive rollout stages, strictly ascending, each 1..=100.
    pub stages: Vec<u8>,
    pub stage_duration_ms: u64,
    /// Extra environment variables (and secrets) passed to provisioning.
    pub env: BTreeMap<String, String>,
    /// Feature toggles this release turns on or reconfigures.
    pub toggles: BTreeMap<String, ToggleConfig>,
    /// Override the configured rolling surge bound.
    pub max_surge_percent: Option<u8>,
    /// Override the configured rolling unavailability bound.
    pub max_unavailable_percent: Option<u8>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            strategy: None,
            keep_blue: false,
            gradual_switch: false,
            switch_duration_ms: 300_000,
            monitor_duration_ms: 600_000,
            canary_percentage: 10,
            canary_duration_ms: 1_800_000,
            stages: vec![25, 50, 75, 100],
            stage_duration_ms: 600_000,
            env: BTreeMap::new(),
            toggles: BTreeMap::new(),
            max_surge_percent: None,
            max_unavailable_percent: None,
        }
    }
}

impl DeployOptions {
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn switch_duration(&self) -> Duration {
        Duration::from_millis(self.switch_duration_ms)
    }

    pub fn monitor_duration(&self) -> Duration {
        Duration::from_millis(self.monitor_duration_ms)
    }

    pub fn canary_duration(&self) -> Duration {
        Duration::from_millis(self.canary_duration_ms)
    }

    pub fn stage_duration(&self) -> Duration {
        Duration::from_millis(self.stage_duration_ms)
    }

    /// Every problem with these options, empty when they are usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(1..=99).contains(&self.canary_percentage) {
            problems.push(format!(
                "canary_percentage must be 1-99, got {}",
                self.canary_percentage
            ));
        }
        if self.stages.is_empty() {
            problems.push("stages must not be empty".to_string());
        }
        if let Some(bad) = self.stages.iter().find(|s| !(1..=100).contains(*s)) {
            problems.push(format!("stage {bad} is outside 1-100"));
        }
        if self.stages.windows(2).any(|w| w[0] >= w[1]) {
            problems.push(format!("stages must be strictly ascending: {:?}", self.stages));
        }
        for (name, bound) in [
            ("max_surge_percent", self.max_surge_percent),
            ("max_unavailable_percent", self.max_unavailable_percent),
        ] {
            if let Some(b) = bound.filter(|b| *b > 100) {
                problems.push(format!("{name} must be 0-100, got {b}"));
            }
        }
        for (name, toggle) in &self.toggles {
            if toggle.rollout_percentage > 100 {
                problems.push(format!("toggle {name}: rollout_percentage above 100"));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = DeployOptions::default();
        assert!(!opts.keep_blue);
        assert_eq!(opts.switch_duration(), Duration::from_secs(300));
        assert_eq!(opts.monitor_duration(), Duration::from_secs(600));
        assert_eq!(opts.canary_percentage, 10);
        assert_eq!(opts.canary_duration(), Duration::from_secs(1800));
        assert_eq!(opts.stages, vec![25, 50, 75, 100]);
        assert!(opts.problems().is_empty());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let opts: DeployOptions =
            serde_json::from_str(r#"{"strategy":"canary","canary_percentage":5}"#).unwrap();
        assert_eq!(opts.strategy, Some(Strategy::Canary));
        assert_eq!(opts.canary_percentage, 5);
        assert_eq!(opts.stages, vec![25, 50, 75, 100]);
    }

    #[test]
    fn problems_are_collected() {
        let opts = DeployOptions {
            canary_percentage: 0,
            stages: vec![50, 25, 101],
            ..Default::default()
        };
        let problems = opts.problems();
        assert_eq!(problems.len(), 3, "{problems:?}");
    }
}
