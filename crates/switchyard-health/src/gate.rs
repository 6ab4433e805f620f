//! Bounded polling until an environment is healthy.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use switchyard_core::{Interrupted, Pacer};

use crate::probe::{HealthProbe, ProbeResult};
use crate::tracker::{HealthStatus, HealthTracker};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("not healthy after {waited:?}: {last_reason}")]
    Timeout { waited: Duration, last_reason: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Polls every probe against every endpoint at a fixed interval until all
/// pass or the timeout elapses.
///
/// This is the only retrying loop in a deployment. An empty endpoint list
/// never becomes healthy.
pub struct HealthGate {
    probes: Vec<Arc<dyn HealthProbe>>,
    interval: Duration,
    timeout: Duration,
    healthy_threshold: u32,
}

impl HealthGate {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>, interval: Duration, timeout: Duration) -> Self {
        Self {
            probes,
            interval,
            timeout,
            healthy_threshold: 1,
        }
    }

    /// Require `n` consecutive passing rounds per endpoint.
    pub fn with_healthy_threshold(mut self, n: u32) -> Self {
        self.healthy_threshold = n.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every probe against one endpoint; the first failure wins.
    async fn probe_endpoint(&self, endpoint: &str) -> ProbeResult {
        for probe in &self.probes {
            let result = probe.check(endpoint).await;
            if !result.is_healthy() {
                let reason = result.reason().unwrap_or_default();
                return match result {
                    ProbeResult::Failed(_) => {
                        ProbeResult::Failed(format!("{} probe on {endpoint}: {reason}", probe.name()))
                    }
                    _ => ProbeResult::Unhealthy(format!("{} probe on {endpoint}: {reason}", probe.name())),
                };
            }
        }
        ProbeResult::Healthy
    }

    /// Wait until every endpoint is healthy. Returns the number of rounds used.
    pub async fn wait_for_healthy(&self, endpoints: &[String], pacer: &Pacer) -> Result<u32, HealthError> {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut trackers: Vec<HealthTracker> = endpoints
            .iter()
            .map(|_| HealthTracker::with_thresholds(1, self.healthy_threshold))
            .collect();
        let mut rounds = 0u32;
        let mut last_reason: Option<String> = None;

        loop {
            rounds += 1;
            // A probe that never answers still counts against the health timeout.
            let round = join_all(endpoints.iter().map(|ep| self.probe_endpoint(ep)));
            let Ok(results) = pacer.guard(timeout_at(deadline, round)).await? else {
                let waited = Instant::now() - start;
                warn!(rounds, ?waited, "probe round still running at health timeout");
                let unfinished = "probe round did not finish";
                return Err(HealthError::Timeout {
                    waited,
                    last_reason: match last_reason {
                        Some(reason) => format!("{reason}; {unfinished}"),
                        None => unfinished.to_string(),
                    },
                });
            };

            for (tracker, result) in trackers.iter_mut().zip(&results) {
                tracker.record(result);
            }

            let all_healthy =
                !trackers.is_empty() && trackers.iter().all(|t| t.status() == HealthStatus::Healthy);
            if all_healthy {
                info!(endpoints = endpoints.len(), rounds, "environment healthy");
                return Ok(rounds);
            }

            let reason = trackers
                .iter()
                .filter(|t| t.status() != HealthStatus::Healthy)
                .find_map(|t| t.last_reason())
                .unwrap_or(if endpoints.is_empty() {
                    "no endpoints to probe"
                } else {
                    "awaiting consecutive successes"
                })
                .to_string();
            debug!(rounds, %reason, "environment not yet healthy");

            let now = Instant::now();
            if now >= deadline {
                return Err(HealthError::Timeout {
                    waited: now - start,
                    last_reason: reason,
                });
            }
            last_reason = Some(reason);
            pacer.sleep(self.interval.min(deadline - now)).await?;
        }
    }
}
