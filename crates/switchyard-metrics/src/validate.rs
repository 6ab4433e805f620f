//! Threshold checks. A value equal to its limit passes; only `>` breaches.
//! A NaN or infinite reading is always a breach.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use switchyard_core::Thresholds;
use switchyard_state::AggregatedMetric;

use crate::sample::{CPU_USAGE, ERROR_RATE, MEMORY_USAGE, MetricsSample, RESPONSE_TIME_MS};

/// One metric over its limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breach {
    pub metric: String,
    pub observed: f64,
    pub limit: f64,
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} > {}", self.metric, self.observed, self.limit)
    }
}

fn limits(thresholds: &Thresholds) -> [(&'static str, f64); 4] {
    [
        (ERROR_RATE, thresholds.error_rate),
        (RESPONSE_TIME_MS, thresholds.response_time_ms),
        (CPU_USAGE, thresholds.cpu_usage),
        (MEMORY_USAGE, thresholds.memory_usage),
    ]
}

fn breaches(observe: impl Fn(&str) -> Option<f64>, thresholds: &Thresholds) -> Vec<Breach> {
    limits(thresholds)
        .into_iter()
        .filter_map(|(metric, limit)| {
            let observed = observe(metric)?;
            (!observed.is_finite() || observed > limit).then(|| Breach {
                metric: metric.to_string(),
                observed,
                limit,
            })
        })
        .collect()
}

/// Every thresholded metric of `sample` that exceeds its limit.
pub fn check_sample(sample: &MetricsSample, thresholds: &Thresholds) -> Vec<Breach> {
    breaches(
        |metric| {
            sample
                .fields()
                .into_iter()
                .find(|(name, _)| *name == metric)
                .map(|(_, v)| v)
        },
        thresholds,
    )
}

/// True when no thresholded metric exceeds its limit.
pub fn validate_metrics(sample: &MetricsSample, thresholds: &Thresholds) -> bool {
    check_sample(sample, thresholds).is_empty()
}

/// Compare the window average of each metric against the thresholds.
/// Metrics missing from the aggregate are not checked.
pub fn check_aggregate(aggregate: &BTreeMap<String, AggregatedMetric>, thresholds: &Thresholds) -> Vec<Breach> {
    breaches(|metric| aggregate.get(metric).map(|m| m.avg), thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_samples;

    fn sample(error_rate: f64, response_time_ms: f64, cpu: f64, mem: f64) -> MetricsSample {
        MetricsSample {
            error_rate,
            response_time_ms,
            throughput: 100.0,
            cpu_usage: cpu,
            memory_usage: mem,
        }
    }

    #[test]
    fn boundary_values_pass() {
        let t = Thresholds::default();
        assert!(validate_metrics(&sample(0.01, 1000.0, 80.0, 80.0), &t));
    }

    #[test]
    fn each_metric_can_fail_alone() {
        let t = Thresholds::default();
        assert!(!validate_metrics(&sample(0.011, 1000.0, 80.0, 80.0), &t));
        assert!(!validate_metrics(&sample(0.01, 1000.1, 80.0, 80.0), &t));
        assert!(!validate_metrics(&sample(0.01, 1000.0, 80.5, 80.0), &t));
        assert!(!validate_metrics(&sample(0.01, 1000.0, 80.0, 81.0), &t));
    }

    #[test]
    fn breaches_are_listed() {
        let t = Thresholds::default();
        let found = check_sample(&sample(0.06, 2500.0, 10.0, 10.0), &t);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].metric, ERROR_RATE);
        assert_eq!(found[0].to_string(), "error_rate 0.06 > 0.01");
        assert_eq!(found[1].metric, RESPONSE_TIME_MS);
    }

    #[test]
    fn non_finite_readings_breach() {
        let t = Thresholds::default();
        let found = check_sample(&sample(f64::NAN, 100.0, 10.0, 10.0), &t);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric, ERROR_RATE);
        assert!(found[0].observed.is_nan());
        assert!(!validate_metrics(&sample(0.0, f64::INFINITY, 10.0, 10.0), &t));
        assert!(!validate_metrics(&sample(0.0, 100.0, 10.0, f64::NAN), &t));
    }

    #[test]
    fn anomaly_lines_are_looser() {
        let a = Thresholds::anomaly();
        assert!(validate_metrics(&sample(0.05, 2000.0, 90.0, 90.0), &a));
        assert!(!validate_metrics(&sample(0.06, 100.0, 10.0, 10.0), &a));
    }

    #[test]
    fn aggregate_uses_average() {
        let t = Thresholds::default();
        // One spike, average still under the limit.
        let samples = [
            sample(0.0, 100.0, 10.0, 10.0),
            sample(0.0, 100.0, 10.0, 10.0),
            sample(0.02, 100.0, 10.0, 10.0),
        ];
        assert!(check_aggregate(&aggregate_samples(&samples), &t).is_empty());

        let samples = [sample(0.02, 100.0, 10.0, 10.0), sample(0.02, 100.0, 10.0, 10.0)];
        let found = check_aggregate(&aggregate_samples(&samples), &t);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric, ERROR_RATE);
    }
}
