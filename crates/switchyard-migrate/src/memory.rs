//! In-memory [`SchemaDatabase`] that records statements instead of running them.
//!
//! Useful for dry runs and tests. Backfill `UPDATE`s drain a configurable
//! number of NULL rows, `LIMIT` rows at a time.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::{SchemaDatabase, SchemaTransaction};

#[derive(Debug, Default)]
struct Inner {
    executed: Vec<String>,
    committed: Vec<String>,
    rollbacks: u32,
    null_rows: u64,
    fail_on: Option<String>,
    unreachable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySchemaDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySchemaDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows the next backfill will find with a NULL column.
    pub fn with_null_rows(self, rows: u64) -> Self {
        self.lock().null_rows = rows;
        self
    }

    /// Fail any statement containing `fragment`.
    pub fn failing_on(self, fragment: &str) -> Self {
        self.lock().fail_on = Some(fragment.to_string());
        self
    }

    /// Refuse connections.
    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    /// Every statement attempted, committed or not, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Statements from committed transactions, in order.
    pub fn committed(&self) -> Vec<String> {
        self.lock().committed.clone()
    }

    pub fn rollbacks(&self) -> u32 {
        self.lock().rollbacks
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SchemaDatabase for MemorySchemaDatabase {
    async fn begin(&self) -> anyhow::Result<Box<dyn SchemaTransaction>> {
        if self.lock().unreachable {
            anyhow::bail!("connection refused");
        }
        Ok(Box::new(MemoryTransaction {
            db: self.clone(),
            pending: Vec::new(),
        }))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        if self.lock().unreachable {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

struct MemoryTransaction {
    db: MemorySchemaDatabase,
    pending: Vec<String>,
}

/// The `LIMIT n` of a batched update, if present.
fn batch_limit(sql: &str) -> Option<u64> {
    let rest = &sql[sql.rfind("LIMIT ")? + "LIMIT ".len()..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[async_trait]
impl SchemaTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> anyhow::Result<u64> {
        let mut inner = self.db.lock();
        inner.executed.push(sql.to_string());
        if let Some(fragment) = &inner.fail_on {
            if sql.contains(fragment.as_str()) {
                anyhow::bail!("statement failed: {sql}");
            }
        }
        self.pending.push(sql.to_string());

        if sql.starts_with("UPDATE ") {
            if let Some(limit) = batch_limit(sql) {
                let touched = inner.null_rows.min(limit);
                inner.null_rows -= touched;
                return Ok(touched);
            }
        }
        Ok(0)
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let MemoryTransaction { db, pending } = *self;
        db.lock().committed.extend(pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        self.db.lock().rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_parsed_from_batch_update() {
        assert_eq!(
            batch_limit("UPDATE t SET c = 1 WHERE id IN (SELECT id FROM t WHERE c IS NULL LIMIT 500)"),
            Some(500)
        );
        assert_eq!(batch_limit("UPDATE t SET c = 1"), None);
    }

    #[tokio::test]
    async fn uncommitted_statements_are_discarded() {
        let db = MemorySchemaDatabase::new();
        let mut txn = db.begin().await.unwrap();
        txn.execute("CREATE TABLE t (id INT)").await.unwrap();
        txn.rollback().await.unwrap();
        assert_eq!(db.executed().len(), 1);
        assert!(db.committed().is_empty());
        assert_eq!(db.rollbacks(), 1);
    }
}
