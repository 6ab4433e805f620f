//! TrafficRouter — owns the weight distribution of each route.
//!
//! Every write replaces the whole distribution, is validated to sum to
//! 100 before anything is touched, and goes to the load balancer before
//! being recorded in the state store. Writes are serialized so the stored
//! weights always match the last distribution the load balancer accepted.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use switchyard_core::{Interrupted, Pacer};
use switchyard_state::{StateError, StateStore, TrafficWeights};

#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("weights must sum to 100, got {total}")]
    InvalidWeightDistribution { total: u32 },

    #[error("no weights recorded for route {0}")]
    RouteUnknown(String),

    #[error("step count must be at least 1")]
    InvalidSteps,

    #[error("load balancer rejected weights for {route}: {source}")]
    LoadBalancer {
        route: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// The cloud load balancer / listener that actually splits traffic.
#[async_trait]
pub trait LoadBalancerControl: Send + Sync {
    async fn set_weights(&self, listener: &str, weights: &TrafficWeights) -> anyhow::Result<()>;
}

/// Decides after each step of a gradual switch whether to continue.
#[async_trait]
pub trait StepValidator: Send + Sync {
    /// `step` is 1-based; `weights` is the distribution now applied.
    async fn validate(&self, step: u32, weights: &TrafficWeights) -> bool;
}

/// How a stepped switch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Every step applied; the target distribution is live.
    Completed(TrafficWeights),
    /// Validation failed after `step`; `weights` is what remains applied.
    Halted { step: u32, weights: TrafficWeights },
}

pub struct TrafficRouter {
    state: StateStore,
    lb: Arc<dyn LoadBalancerControl>,
    write_lock: Mutex<()>,
}

impl TrafficRouter {
    pub fn new(state: StateStore, lb: Arc<dyn LoadBalancerControl>) -> Self {
        Self {
            state,
            lb,
            write_lock: Mutex::new(()),
        }
    }

    /// The distribution last applied to `route`.
    pub fn get_weights(&self, route: &str) -> Result<TrafficWeights, TrafficError> {
        self.state
            .get_route_weights(route)?
            .ok_or_else(|| TrafficError::RouteUnknown(route.to_string()))
    }

    /// Like [`get_weights`](Self::get_weights), treating an unrecorded
    /// route as sending everything to `live`.
    pub fn get_weights_or(&self, route: &str, live: &str) -> Result<TrafficWeights, TrafficError> {
        match self.get_weights(route) {
            Err(TrafficError::RouteUnknown(_)) => Ok(TrafficWeights::all_to(live)),
            other => other,
        }
    }

    /// Atomically replace the distribution for `route`.
    pub async fn set_weights(&self, route: &str, weights: TrafficWeights) -> Result<TrafficWeights, TrafficError> {
        if !weights.is_complete() {
            return Err(TrafficError::InvalidWeightDistribution { total: weights.total() });
        }

        let _guard = self.write_lock.lock().await;
        self.lb
            .set_weights(route, &weights)
            .await
            .map_err(|source| TrafficError::LoadBalancer {
                route: route.to_string(),
                source,
            })?;
        self.state.put_route_weights(route, &weights)?;
        info!(%route, %weights, "traffic weights applied");
        Ok(weights)
    }

    /// Move from `from` to `to` in `steps` evenly spaced distributions over
    /// `total`. After each step pauses `total / steps`, then asks
    /// `validator`; a failed validation stops immediately.
    pub async fn step_towards(
        &self,
        route: &str,
        from: &TrafficWeights,
        to: &TrafficWeights,
        steps: u32,
        total: Duration,
        pacer: &Pacer,
        validator: &dyn StepValidator,
    ) -> Result<StepOutcome, TrafficError> {
        if steps == 0 {
            return Err(TrafficError::InvalidSteps);
        }
        for w in [from, to] {
            if !w.is_complete() {
                return Err(TrafficError::InvalidWeightDistribution { total: w.total() });
            }
        }

        let pause = total / steps;
        let mut applied = from.clone();
        for step in 1..=steps {
            pacer.check()?;
            applied = self.set_weights(route, interpolate(from, to, step, steps)).await?;
            pacer.sleep(pause).await?;

            if !validator.validate(step, &applied).await {
                warn!(%route, step, weights = %applied, "step validation failed; halting switch");
                return Ok(StepOutcome::Halted { step, weights: applied });
            }
            debug!(%route, step, steps, "switch step validated");
        }
        Ok(StepOutcome::Completed(applied))
    }
}

/// The distribution `step / steps` of the way from `from` to `to`.
///
/// Integer weights are rounded with the largest-remainder method so the
/// result always sums to 100 when both ends do. The final step is `to`.
pub fn interpolate(from: &TrafficWeights, to: &TrafficWeights, step: u32, steps: u32) -> TrafficWeights {
    let steps = steps.max(1);
    let step = step.min(steps);
    let envs: BTreeSet<&str> = from.environments().chain(to.environments()).collect();

    let mut parts: Vec<(&str, u32, u32)> = envs
        .into_iter()
        .map(|env| {
            let num = from.get(env) as u32 * (steps - step) + to.get(env) as u32 * step;
            (env, num / steps, num % steps)
        })
        .collect();

    let floor_total: u32 = parts.iter().map(|(_, w, _)| *w).sum();
    let mut deficit = 100u32.saturating_sub(floor_total);

    let mut order: Vec<usize> = (0..parts.len()).collect();
    order.sort_by(|a, b| parts[*b].2.cmp(&parts[*a].2));
    for idx in order {
        if deficit == 0 {
            break;
        }
        if parts[idx].2 > 0 {
            parts[idx].1 += 1;
            deficit -= 1;
        }
    }

    parts.into_iter().map(|(env, w, _)| (env, w as u8)).collect()
}
