//! Window aggregation: avg, min, max and percentiles per metric.

use std::collections::BTreeMap;

use switchyard_state::AggregatedMetric;

use crate::sample::MetricsSample;

/// Summarize a series of values. An empty series is all zeros.
pub fn aggregate_values(values: &[f64]) -> AggregatedMetric {
    if values.is_empty() {
        return AggregatedMetric {
            avg: 0.0,
            min: 0.0,
            max: 0.0,
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
        };
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let sum: f64 = sorted.iter().sum();
    AggregatedMetric {
        avg: sum / sorted.len() as f64,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p50: percentile(&sorted, 0.50),
        p95: percentile(&sorted, 0.95),
        p99: percentile(&sorted, 0.99),
    }
}

/// Nearest-rank value at quantile `q` of an already sorted, non-empty slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = (sorted.len() as f64 * q).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Aggregate each metric across a window of samples.
pub fn aggregate_samples(samples: &[MetricsSample]) -> BTreeMap<String, AggregatedMetric> {
    let mut series: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        for (name, value) in sample.fields() {
            series.entry(name).or_default().push(value);
        }
    }
    series
        .into_iter()
        .map(|(name, values)| (name.to_string(), aggregate_values(&values)))
        .collect()
}
