//! Point-in-time metric samples and the backend that produces them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const ERROR_RATE: &str = "error_rate";
pub const RESPONSE_TIME_MS: &str = "response_time_ms";
pub const THROUGHPUT: &str = "throughput";
pub const CPU_USAGE: &str = "cpu_usage";
pub const MEMORY_USAGE: &str = "memory_usage";

/// One reading of an environment's health and performance numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    /// Fraction of failed requests, 0.0 to 1.0.
    pub error_rate: f64,
    pub response_time_ms: f64,
    /// Requests per second.
    pub throughput: f64,
    /// Percent.
    pub cpu_usage: f64,
    /// Percent.
    pub memory_usage: f64,
}

impl MetricsSample {
    /// Every metric as a `(name, value)` pair, in a fixed order.
    pub fn fields(&self) -> [(&'static str, f64); 5] {
        [
            (ERROR_RATE, self.error_rate),
            (RESPONSE_TIME_MS, self.response_time_ms),
            (THROUGHPUT, self.throughput),
            (CPU_USAGE, self.cpu_usage),
            (MEMORY_USAGE, self.memory_usage),
        ]
    }
}

/// Source of metric readings (CloudWatch, Prometheus, a test fake).
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Metrics for `environment` over the trailing `window`.
    async fn query(&self, environment: &str, window: Duration) -> anyhow::Result<MetricsSample>;
}
