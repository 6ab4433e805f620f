//! Consecutive-result tracking for a single endpoint.

use tracing::{debug, warn};

use crate::probe::ProbeResult;

/// Health of one endpoint as seen by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Tracks consecutive probe results for a single endpoint.
#[derive(Debug)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Failures before marking unhealthy.
    unhealthy_threshold: u32,
    /// Successes needed to become healthy.
    healthy_threshold: u32,
    last_reason: Option<String>,
}

impl HealthTracker {
    /// A tracker that turns healthy on the first success.
    pub fn new() -> Self {
        Self::with_thresholds(1, 1)
    }

    pub fn with_thresholds(unhealthy_threshold: u32, healthy_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
            last_reason: None,
        }
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: &ProbeResult) -> HealthStatus {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;

                if self.consecutive_successes >= self.healthy_threshold {
                    if self.status != HealthStatus::Healthy {
                        debug!(successes = self.consecutive_successes, "endpoint healthy");
                    }
                    self.status = HealthStatus::Healthy;
                }
            }
            ProbeResult::Unhealthy(reason) | ProbeResult::Failed(reason) => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;
                self.last_reason = Some(reason.clone());

                if self.consecutive_failures >= self.unhealthy_threshold {
                    if self.status == HealthStatus::Healthy {
                        warn!(
                            failures = self.consecutive_failures,
                            %reason,
                            "endpoint became unhealthy"
                        );
                    }
                    self.status = HealthStatus::Unhealthy;
                }
            }
        }

        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Reason attached to the most recent failure.
    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
