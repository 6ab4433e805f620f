//! switchyard-metrics — performance numbers for rollout decisions.
//!
//! Wraps a [`MetricsBackend`] in a [`MetricsGateway`] that answers point
//! queries and runs paced monitoring windows, then summarizes each window
//! (avg, min, max, p50, p95, p99) and checks samples or aggregates against
//! [`Thresholds`](switchyard_core::Thresholds).

pub mod aggregate;
pub mod gateway;
pub mod sample;
pub mod validate;

pub use aggregate::{aggregate_samples, aggregate_values};
pub use gateway::{MetricsError, MetricsGateway, MonitorReport};
pub use sample::{CPU_USAGE, ERROR_RATE, MEMORY_USAGE, MetricsBackend, MetricsSample, RESPONSE_TIME_MS, THROUGHPUT};
pub use validate::{Breach, check_aggregate, check_sample, validate_metrics};
