//! switchyard-core — shared vocabulary for the Switchyard crates.
//!
//! - **`config`** — `switchyard.toml` parsing and validation
//! - **`duration`** — human duration strings ("5s", "500ms", "10m", "2h")
//! - **`pacer`** — cancellable, deadline-bounded sleeps for polling loops
//! - **`types`** — deployment strategy and small shared enums

pub mod config;
pub mod duration;
pub mod pacer;
pub mod types;

pub use config::{ConfigError, SwitchyardConfig, Thresholds, Timings};
pub use duration::parse_duration;
pub use pacer::{CancelHandle, Interrupted, Pacer};
pub use types::*;
