//! switchyard.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::Strategy;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchyardConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default = "Thresholds::anomaly")]
    pub anomaly: Thresholds,
    #[serde(default)]
    pub rolling: RollingConfig,
    #[serde(default)]
    pub preflight: PreflightConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Logical service name; one deployment may be in flight per name.
    pub name: String,
    /// Load-balancer listener / route whose weights are shifted.
    #[serde(default = "default_route")]
    pub route: String,
    #[serde(default = "default_stable")]
    pub stable_environment: String,
    #[serde(default = "default_candidate")]
    pub candidate_environment: String,
    #[serde(default = "default_canary")]
    pub canary_environment: String,
    #[serde(default)]
    pub default_strategy: Strategy,
    /// Upper bound on a whole deployment, rollback excluded.
    #[serde(default = "default_deployment_timeout")]
    pub deployment_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthConfig {
    /// HTTP path probed on each endpoint of a new environment.
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_health_interval")]
    pub interval: String,
    #[serde(default = "default_health_timeout")]
    pub timeout: String,
    /// Timeout per individual probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringConfig {
    /// Time between metric samples while monitoring.
    #[serde(default = "default_sample_interval")]
    pub sample_interval: String,
    /// Window each metrics query covers.
    #[serde(default = "default_query_window")]
    pub query_window: String,
    /// Pause between progressive rollout stages.
    #[serde(default = "default_bake_time")]
    pub bake_time: String,
    /// Number of steps in a gradual traffic switch.
    #[serde(default = "default_switch_steps")]
    pub switch_steps: u32,
}

/// Upper bounds for live metrics. A value equal to its bound passes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    /// Fraction of failed requests (0.0–1.0).
    pub error_rate: f64,
    pub response_time_ms: f64,
    /// CPU usage percentage (0–100).
    pub cpu_usage: f64,
    /// Memory usage percentage (0–100).
    pub memory_usage: f64,
}

impl Thresholds {
    /// Lines past which a single sample is reported as an anomaly.
    pub fn anomaly() -> Self {
        Self {
            error_rate: 0.05,
            response_time_ms: 2000.0,
            cpu_usage: 90.0,
            memory_usage: 90.0,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.01,
            response_time_ms: 1000.0,
            cpu_usage: 80.0,
            memory_usage: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollingConfig {
    #[serde(default = "default_workload")]
    pub workload: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Image repository; the deployed image is `{image}:{version}`.
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_surge")]
    pub max_surge_percent: u8,
    #[serde(default = "default_surge")]
    pub max_unavailable_percent: u8,
    #[serde(default = "default_rollout_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreflightConfig {
    /// Directory whose filesystem must have `min_free_bytes` available.
    pub disk_path: Option<PathBuf>,
    #[serde(default)]
    pub min_free_bytes: u64,
    /// `host:port` dependencies that must resolve.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Secret names that must be present and non-empty.
    #[serde(default)]
    pub required_secrets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_channel")]
    pub channel: String,
    /// Channel for pages that need a human (failed rollbacks).
    #[serde(default = "default_escalation_channel")]
    pub escalation_channel: String,
}

fn default_route() -> String {
    "default".to_string()
}
fn default_stable() -> String {
    "blue".to_string()
}
fn default_candidate() -> String {
    "green".to_string()
}
fn default_canary() -> String {
    "canary".to_string()
}
fn default_deployment_timeout() -> String {
    "4h".to_string()
}
fn default_health_path() -> String {
    "/health".to_string()
}
fn default_health_interval() -> String {
    "5s".to_string()
}
fn default_health_timeout() -> String {
    "30s".to_string()
}
fn default_probe_timeout() -> String {
    "5s".to_string()
}
fn default_sample_interval() -> String {
    "30s".to_string()
}
fn default_query_window() -> String {
    "1m".to_string()
}
fn default_bake_time() -> String {
    "60s".to_string()
}
fn default_switch_steps() -> u32 {
    10
}
fn default_workload() -> String {
    "app".to_string()
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_image() -> String {
    "app".to_string()
}
fn default_surge() -> u8 {
    25
}
fn default_rollout_timeout() -> String {
    "10m".to_string()
}
fn default_notify_channel() -> String {
    "deployments".to_string()
}
fn default_escalation_channel() -> String {
    "oncall".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            query_window: default_query_window(),
            bake_time: default_bake_time(),
            switch_steps: default_switch_steps(),
        }
    }
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            workload: default_workload(),
            namespace: default_namespace(),
            image: default_image(),
            max_surge_percent: default_surge(),
            max_unavailable_percent: default_surge(),
            timeout: default_rollout_timeout(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel: default_notify_channel(),
            escalation_channel: default_escalation_channel(),
        }
    }
}

/// Parsed durations, resolved once after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub deployment_timeout: Duration,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub probe_timeout: Duration,
    pub sample_interval: Duration,
    pub query_window: Duration,
    pub bake_time: Duration,
    pub rollout_timeout: Duration,
}

impl SwitchyardConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SwitchyardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Defaults for everything except the service name.
    pub fn scaffold(service: &str) -> Self {
        SwitchyardConfig {
            service: ServiceConfig {
                name: service.to_string(),
                route: default_route(),
                stable_environment: default_stable(),
                candidate_environment: default_candidate(),
                canary_environment: default_canary(),
                default_strategy: Strategy::BlueGreen,
                deployment_timeout: default_deployment_timeout(),
            },
            health: HealthConfig::default(),
            monitoring: MonitoringConfig::default(),
            thresholds: Thresholds::default(),
            anomaly: Thresholds::anomaly(),
            rolling: RollingConfig::default(),
            preflight: PreflightConfig::default(),
            notify: NotifyConfig::default(),
        }
    }

    /// Check cross-field constraints and that every duration parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let svc = &self.service;
        if svc.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service.name must not be empty".into()));
        }
        let envs = [
            &svc.stable_environment,
            &svc.candidate_environment,
            &svc.canary_environment,
        ];
        if envs.iter().any(|e| e.trim().is_empty()) {
            return Err(ConfigError::Invalid("environment names must not be empty".into()));
        }
        if svc.stable_environment == svc.candidate_environment
            || svc.stable_environment == svc.canary_environment
            || svc.candidate_environment == svc.canary_environment
        {
            return Err(ConfigError::Invalid(
                "stable, candidate and canary environments must be distinct".into(),
            ));
        }
        if self.monitoring.switch_steps == 0 {
            return Err(ConfigError::Invalid("monitoring.switch_steps must be at least 1".into()));
        }
        if self.rolling.max_surge_percent > 100 || self.rolling.max_unavailable_percent > 100 {
            return Err(ConfigError::Invalid("rolling surge bounds are percentages (0-100)".into()));
        }
        for (name, t) in [("thresholds", &self.thresholds), ("anomaly", &self.anomaly)] {
            let values = [t.error_rate, t.response_time_ms, t.cpu_usage, t.memory_usage];
            if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} values must be finite and non-negative"
                )));
            }
        }
        self.timings().map(|_| ())
    }

    /// Resolve every duration string.
    pub fn timings(&self) -> Result<Timings, ConfigError> {
        Ok(Timings {
            deployment_timeout: duration_field(
                "service.deployment_timeout",
                &self.service.deployment_timeout,
            )?,
            health_interval: duration_field("health.interval", &self.health.interval)?,
            health_timeout: duration_field("health.timeout", &self.health.timeout)?,
            probe_timeout: duration_field("health.probe_timeout", &self.health.probe_timeout)?,
            sample_interval: duration_field(
                "monitoring.sample_interval",
                &self.monitoring.sample_interval,
            )?,
            query_window: duration_field("monitoring.query_window", &self.monitoring.query_window)?,
            bake_time: duration_field("monitoring.bake_time", &self.monitoring.bake_time)?,
            rollout_timeout: duration_field("rolling.timeout", &self.rolling.timeout)?,
        })
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let config = SwitchyardConfig::from_toml_str(
            r#"
[service]
name = "api"
"#,
        )
        .unwrap();
        assert_eq!(config.service.name, "api");
        assert_eq!(config.service.stable_environment, "blue");
        assert_eq!(config.service.candidate_environment, "green");
        assert_eq!(config.service.default_strategy, Strategy::BlueGreen);
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.anomaly, Thresholds::anomaly());

        let timings = config.timings().unwrap();
        assert_eq!(timings.health_interval, Duration::from_secs(5));
        assert_eq!(timings.health_timeout, Duration::from_secs(30));
        assert_eq!(timings.sample_interval, Duration::from_secs(30));
        assert_eq!(timings.bake_time, Duration::from_secs(60));
        assert_eq!(timings.deployment_timeout, Duration::from_secs(4 * 3600));
    }

    #[test]
    fn parse_full_sections() {
        let config = SwitchyardConfig::from_toml_str(
            r#"
[service]
name = "checkout"
route = "arn:listener/1"
default_strategy = "canary"

[thresholds]
error_rate = 0.02
response_time_ms = 500.0
cpu_usage = 70.0
memory_usage = 75.0

[rolling]
workload = "checkout"
namespace = "prod"
image = "registry/checkout"

[preflight]
disk_path = "/var/lib/switchyard"
min_free_bytes = 1073741824
required_secrets = ["DATABASE_URL"]
"#,
        )
        .unwrap();
        assert_eq!(config.service.default_strategy, Strategy::Canary);
        assert_eq!(config.thresholds.error_rate, 0.02);
        assert_eq!(config.rolling.namespace, "prod");
        assert_eq!(config.rolling.max_surge_percent, 25);
        assert_eq!(config.preflight.required_secrets, vec!["DATABASE_URL"]);
    }

    #[test]
    fn rejects_bad_duration() {
        let err = SwitchyardConfig::from_toml_str(
            r#"
[service]
name = "api"

[health]
interval = "often"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Duration { field: "health.interval", .. }));
    }

    #[test]
    fn rejects_clashing_environments() {
        let err = SwitchyardConfig::from_toml_str(
            r#"
[service]
name = "api"
candidate_environment = "blue"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = SwitchyardConfig::scaffold("my-api");
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("my-api"));
        let back = SwitchyardConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchyard.toml");
        std::fs::write(&path, "[service]\nname = \"disk\"\n").unwrap();
        let config = SwitchyardConfig::from_file(&path).unwrap();
        assert_eq!(config.service.name, "disk");

        let missing = SwitchyardConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
