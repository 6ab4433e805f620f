//! Database seam for schema changes.

use async_trait::async_trait;

/// The relational database migrations run against.
#[async_trait]
pub trait SchemaDatabase: Send + Sync {
    /// Open a transaction. Every statement of one run goes through it.
    async fn begin(&self) -> anyhow::Result<Box<dyn SchemaTransaction>>;

    /// Cheap connectivity check used by preflight.
    async fn ping(&self) -> anyhow::Result<()>;
}

/// An open transaction. Dropping it without commit is a rollback.
#[async_trait]
pub trait SchemaTransaction: Send {
    /// Run one statement and return the number of rows it touched.
    async fn execute(&mut self, sql: &str) -> anyhow::Result<u64>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}
