//! Deployment lifecycle events for dashboards and alerting.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use switchyard_core::Strategy;
use switchyard_metrics::{Breach, MetricsSample};
use switchyard_state::AggregatedMetric;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeployEvent {
    Started {
        service: String,
        version: String,
        strategy: Strategy,
    },
    Completed {
        service: String,
        version: String,
        environment: String,
        duration_ms: u64,
        metrics: BTreeMap<String, AggregatedMetric>,
    },
    Failed {
        service: String,
        version: String,
        error: String,
    },
    /// A sample crossed an anomaly line. Informational; the rollout continues.
    Anomaly {
        service: String,
        environment: String,
        sample: MetricsSample,
        breaches: Vec<Breach>,
    },
    RollbackCompleted {
        service: String,
        from: String,
        to: String,
    },
    RollbackFailed {
        service: String,
        error: String,
    },
}

impl DeployEvent {
    /// Wire name used by external consumers.
    pub fn name(&self) -> &'static str {
        match self {
            DeployEvent::Started { .. } => "deployment:start",
            DeployEvent::Completed { .. } => "deployment:complete",
            DeployEvent::Failed { .. } => "deployment:failed",
            DeployEvent::Anomaly { .. } => "deployment:anomaly",
            DeployEvent::RollbackCompleted { .. } => "rollback:complete",
            DeployEvent::RollbackFailed { .. } => "rollback:failed",
        }
    }
}

/// Broadcasts events to any number of subscribers.
///
/// Slow subscribers lag and miss events rather than blocking deployments.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DeployEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeployEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: DeployEvent) {
        debug!(event = event.name(), "emitting deployment event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
