//! switchyard-state — embedded state store for Switchyard.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for deployment records, the schema migration registry, feature
//! toggles, and per-route traffic weights.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by service name, migration version, toggle name, or route id.
//!
//! Every write is its own redb write transaction, so a crash between two
//! writes leaves the earlier one durable. `begin_deployment` performs its
//! read and write inside a single write transaction, which makes it an
//! atomic check-and-set on the in-progress flag.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{BeginOutcome, StateStore};
pub use types::*;
