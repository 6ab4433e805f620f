//! MetricsGateway — point queries and monitoring windows over a backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use switchyard_core::{Interrupted, Pacer};
use switchyard_state::AggregatedMetric;

use crate::aggregate::aggregate_samples;
use crate::sample::{MetricsBackend, MetricsSample};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics query for {environment} failed: {source}")]
    Backend {
        environment: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Samples collected over one monitoring window.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub samples: Vec<MetricsSample>,
    pub aggregate: BTreeMap<String, AggregatedMetric>,
}

/// Pulls metrics for named environments from a [`MetricsBackend`].
#[derive(Clone)]
pub struct MetricsGateway {
    backend: Arc<dyn MetricsBackend>,
    window: Duration,
}

impl MetricsGateway {
    /// `window` is the trailing range each query covers.
    pub fn new(backend: Arc<dyn MetricsBackend>, window: Duration) -> Self {
        Self { backend, window }
    }

    /// Current metrics for an environment.
    pub async fn current(&self, environment: &str) -> Result<MetricsSample, MetricsError> {
        self.backend
            .query(environment, self.window)
            .await
            .map_err(|source| MetricsError::Backend {
                environment: environment.to_string(),
                source,
            })
    }

    /// Sample `environment` every `interval` for `duration` and aggregate.
    ///
    /// Takes at least one sample and one more at the end of the window.
    /// `on_sample` sees each sample as it arrives.
    pub async fn monitor<F>(
        &self,
        environment: &str,
        duration: Duration,
        interval: Duration,
        pacer: &Pacer,
        mut on_sample: F,
    ) -> Result<MonitorReport, MetricsError>
    where
        F: FnMut(&MetricsSample) + Send,
    {
        let start = Instant::now();
        let mut samples = Vec::new();

        loop {
            let sample = pacer.guard(self.current(environment)).await??;
            on_sample(&sample);
            samples.push(sample);

            let elapsed = start.elapsed();
            if elapsed >= duration {
                break;
            }
            pacer.sleep(interval.min(duration - elapsed)).await?;
        }

        let aggregate = aggregate_samples(&samples);
        debug!(%environment, samples = samples.len(), "monitoring window closed");
        Ok(MonitorReport { samples, aggregate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::sample::ERROR_RATE;

    /// Returns queued samples in order, repeating the last one.
    struct ScriptedBackend {
        samples: Mutex<Vec<MetricsSample>>,
        queried: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(mut samples: Vec<MetricsSample>) -> Arc<Self> {
            samples.reverse();
            Arc::new(Self {
                samples: Mutex::new(samples),
                queried: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MetricsBackend for ScriptedBackend {
        async fn query(&self, environment: &str, _window: Duration) -> anyhow::Result<MetricsSample> {
            self.queried.lock().unwrap().push(environment.to_string());
            let mut samples = self.samples.lock().unwrap();
            if samples.len() > 1 {
                Ok(samples.pop().unwrap())
            } else {
                samples.last().copied().ok_or_else(|| anyhow::anyhow!("backend down"))
            }
        }
    }

    fn err(rate: f64) -> MetricsSample {
        MetricsSample {
            error_rate: rate,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_samples_across_window() {
        let backend = ScriptedBackend::new(vec![err(0.0), err(0.01), err(0.02)]);
        let gateway = MetricsGateway::new(backend.clone(), Duration::from_secs(60));
        let mut seen = 0;
        let start = Instant::now();

        let report = gateway
            .monitor(
                "green",
                Duration::from_secs(60),
                Duration::from_secs(30),
                &Pacer::unbounded(),
                |_| seen += 1,
            )
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(report.samples.len(), 3);
        assert_eq!(seen, 3);
        assert_eq!(report.aggregate[ERROR_RATE].max, 0.02);
        assert!(backend.queried.lock().unwrap().iter().all(|e| e == "green"));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_takes_one_sample() {
        let backend = ScriptedBackend::new(vec![err(0.0)]);
        let gateway = MetricsGateway::new(backend, Duration::from_secs(60));
        let report = gateway
            .monitor("green", Duration::ZERO, Duration::from_secs(30), &Pacer::unbounded(), |_| {})
            .await
            .unwrap();
        assert_eq!(report.samples.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_error_names_environment() {
        let backend = ScriptedBackend::new(vec![]);
        let gateway = MetricsGateway::new(backend, Duration::from_secs(60));
        let e = gateway.current("canary").await.unwrap_err();
        assert!(matches!(e, MetricsError::Backend { ref environment, .. } if environment == "canary"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_monitoring() {
        let backend = ScriptedBackend::new(vec![err(0.0)]);
        let gateway = MetricsGateway::new(backend, Duration::from_secs(60));
        let pacer = Pacer::unbounded().with_timeout(Duration::from_secs(45));
        let e = gateway
            .monitor("green", Duration::from_secs(600), Duration::from_secs(30), &pacer, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(e, MetricsError::Interrupted(Interrupted::DeadlineExceeded)));
    }
}
