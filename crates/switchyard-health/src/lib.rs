//! switchyard-health — health probes for freshly provisioned environments.
//!
//! Provides typed probes (HTTP, TCP, cache ping, synthetic transaction)
//! behind the [`HealthProbe`] trait and a bounded polling loop,
//! [`HealthGate`], used by the rollout strategies before any traffic moves.
//!
//! # Architecture
//!
//! ```text
//! HealthGate::wait_for_healthy(endpoints, pacer)
//!   ├── every interval: join_all(endpoints) × probes
//!   ├── HealthTracker per endpoint (consecutive results, last reason)
//!   └── Timeout { last_reason } once the health timeout elapses
//! ```
//!
//! All sleeps go through the caller's `Pacer`, so cancellation and the
//! deployment deadline interrupt the wait.

pub mod gate;
pub mod probe;
pub mod tracker;

pub use gate::{HealthError, HealthGate};
pub use probe::{
    CachePingProbe, HealthProbe, HttpProbe, ProbeResult, SyntheticProbe, SyntheticStep, TcpProbe, http_request,
};
pub use tracker::{HealthStatus, HealthTracker};
