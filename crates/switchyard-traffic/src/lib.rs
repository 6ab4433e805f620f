//! switchyard-traffic — traffic weight control for a route.
//!
//! [`TrafficRouter`] is the single owner of each route's
//! [`TrafficWeights`](switchyard_state::TrafficWeights): it validates,
//! applies through a [`LoadBalancerControl`], and records the result.
//! Gradual switches go through [`TrafficRouter::step_towards`].

pub mod router;

pub use router::{LoadBalancerControl, StepOutcome, StepValidator, TrafficError, TrafficRouter, interpolate};
