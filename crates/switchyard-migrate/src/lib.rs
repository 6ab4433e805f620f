//! switchyard-migrate — versioned schema changes for deployments.
//!
//! Migrations live in the state store registry and are applied by
//! [`MigrationRunner`] against a [`SchemaDatabase`]. Online mode adds
//! columns without defaults, backfills in batches of 1000 rows 100ms
//! apart, then applies constraints; indexes are built concurrently.
//! [`MigrationRunner::revert`] runs down statements newest first and
//! skips migrations that have none.

pub mod db;
pub mod memory;
pub mod plan;
pub mod runner;

pub use db::{SchemaDatabase, SchemaTransaction};
pub use memory::MemorySchemaDatabase;
pub use plan::{MigrationMode, Step, down_sql, up_steps};
pub use runner::{MigrateError, MigrateResult, MigrationRunner, RevertReport, parse_version};
