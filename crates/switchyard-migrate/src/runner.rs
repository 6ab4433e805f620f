//! MigrationRunner — ordered, transactional schema changes.
//!
//! Pending migrations between the current schema version and a target are
//! applied in ascending semver order inside one transaction. Each
//! migration's status is written to the registry as soon as its statements
//! land, so a crash mid-run leaves an accurate record.

use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use thiserror::Error;
use tracing::{debug, info, warn};

use switchyard_core::{Interrupted, Pacer, epoch_millis};
use switchyard_state::{Migration, MigrationStatus, StateError, StateStore};

use crate::db::{SchemaDatabase, SchemaTransaction};
use crate::plan::{MigrationMode, Step, down_sql, up_steps};

pub const DEFAULT_BATCH_SIZE: u64 = 1000;
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("invalid migration version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("migration {0} is already completed")]
    AlreadyApplied(String),

    #[error("migration {migration} failed: {cause}")]
    MigrationFailed { migration: String, cause: String },

    #[error("reverting migration {migration} failed: {cause}")]
    RevertFailed { migration: String, cause: String },

    #[error("database {step} failed: {source}")]
    Database {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

pub type MigrateResult<T> = Result<T, MigrateError>;

/// Parse a migration version, accepting an optional leading `v`.
pub fn parse_version(version: &str) -> MigrateResult<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|e| MigrateError::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// What a revert did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertReport {
    /// Versions whose down statement ran, newest first.
    pub reverted: Vec<String>,
    /// Versions left in place because no down statement is known.
    pub skipped: Vec<String>,
}

pub struct MigrationRunner {
    state: StateStore,
    db: Arc<dyn SchemaDatabase>,
    batch_size: u64,
    batch_pause: Duration,
}

impl MigrationRunner {
    pub fn new(state: StateStore, db: Arc<dyn SchemaDatabase>) -> Self {
        Self {
            state,
            db,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }

    pub fn with_batching(mut self, batch_size: u64, batch_pause: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_pause = batch_pause;
        self
    }

    pub fn database(&self) -> &Arc<dyn SchemaDatabase> {
        &self.db
    }

    /// Add a migration to the registry as `Pending`.
    pub fn register(&self, migration: Migration) -> MigrateResult<()> {
        parse_version(&migration.version)?;
        if let Some(existing) = self.state.get_migration(&migration.version)? {
            if existing.status == MigrationStatus::Completed {
                return Err(MigrateError::AlreadyApplied(migration.version));
            }
        }
        let migration = Migration {
            status: MigrationStatus::Pending,
            completed_at: None,
            error: None,
            ..migration
        };
        self.state.put_migration(&migration)?;
        debug!(version = %migration.version, name = %migration.name, "migration registered");
        Ok(())
    }

    /// Registry entries sorted by version. Unparseable versions are skipped.
    pub fn list(&self) -> MigrateResult<Vec<Migration>> {
        let mut all: Vec<(Version, Migration)> = self
            .state
            .list_migrations()?
            .into_iter()
            .filter_map(|m| match parse_version(&m.version) {
                Ok(v) => Some((v, m)),
                Err(e) => {
                    warn!(error = %e, "ignoring migration with invalid version");
                    None
                }
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all.into_iter().map(|(_, m)| m).collect())
    }

    /// Highest completed migration version, if any.
    pub fn current_schema_version(&self) -> MigrateResult<Option<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|m| m.status == MigrationStatus::Completed)
            .next_back()
            .map(|m| m.version))
    }

    /// Migrations still to apply in `(current, target]`, ascending.
    ///
    /// A migration whose last run failed is picked up again.
    pub fn pending(&self, target: &str) -> MigrateResult<Vec<Migration>> {
        let target = parse_version(target)?;
        let current = match self.current_schema_version()? {
            Some(v) => Some(parse_version(&v)?),
            None => None,
        };
        let mut pending = Vec::new();
        for m in self.list()? {
            let v = parse_version(&m.version)?;
            let above = current.as_ref().is_none_or(|c| v > *c);
            if above && v <= target && m.status != MigrationStatus::Completed {
                pending.push(m);
            }
        }
        Ok(pending)
    }

    /// Apply every pending migration up to `target`. Returns how many ran.
    pub async fn run(&self, target: &str, mode: MigrationMode, pacer: &Pacer) -> MigrateResult<u32> {
        let pending = self.pending(target)?;
        if pending.is_empty() {
            debug!(%target, "no pending migrations");
            return Ok(0);
        }

        info!(%target, count = pending.len(), ?mode, "running migrations");
        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|source| MigrateError::Database { step: "begin", source })?;

        let mut done: Vec<Migration> = Vec::new();
        for migration in pending {
            debug!(version = %migration.version, name = %migration.name, "applying migration");
            if let Err(cause) = self.apply(txn.as_mut(), &migration, mode, pacer).await {
                if let Err(e) = txn.rollback().await {
                    warn!(version = %migration.version, error = %format!("{e:#}"), "transaction rollback failed");
                }
                self.unwind(&done, Some((&migration, &cause)))?;
                return Err(match cause {
                    ApplyError::Interrupted(i) => MigrateError::Interrupted(i),
                    ApplyError::Statement(e) => MigrateError::MigrationFailed {
                        migration: migration.name.clone(),
                        cause: format!("{e:#}"),
                    },
                });
            }

            let mut completed = migration;
            completed.status = MigrationStatus::Completed;
            completed.completed_at = Some(epoch_millis());
            completed.error = None;
            self.state.put_migration(&completed)?;
            done.push(completed);
        }

        if let Err(source) = txn.commit().await {
            self.unwind(&done, None)?;
            return Err(MigrateError::Database { step: "commit", source });
        }

        info!(count = done.len(), "migrations committed");
        Ok(done.len() as u32)
    }

    async fn apply(
        &self,
        txn: &mut dyn SchemaTransaction,
        migration: &Migration,
        mode: MigrationMode,
        pacer: &Pacer,
    ) -> Result<(), ApplyError> {
        for step in up_steps(migration, mode, self.batch_size) {
            match step {
                Step::Execute(sql) => {
                    txn.execute(&sql).await?;
                }
                Step::Backfill(sql) => {
                    let mut batches = 0u32;
                    loop {
                        let touched = txn.execute(&sql).await?;
                        if touched == 0 {
                            break;
                        }
                        batches += 1;
                        pacer.sleep(self.batch_pause).await?;
                    }
                    debug!(version = %migration.version, batches, "backfill finished");
                }
            }
        }
        Ok(())
    }

    /// After a rolled-back transaction, make the registry match the database.
    fn unwind(&self, done: &[Migration], failed: Option<(&Migration, &ApplyError)>) -> MigrateResult<()> {
        for m in done {
            let mut reset = m.clone();
            reset.status = MigrationStatus::Pending;
            reset.completed_at = None;
            self.state.put_migration(&reset)?;
        }
        if let Some((m, cause)) = failed {
            let mut failed = m.clone();
            failed.status = MigrationStatus::Failed;
            failed.error = Some(cause.to_string());
            self.state.put_migration(&failed)?;
            warn!(version = %m.version, error = %cause, reset = done.len(), "migration failed; transaction rolled back");
        }
        Ok(())
    }

    /// Undo completed migrations in `(after, up_to]`, newest first.
    ///
    /// Migrations without a down statement are skipped with a warning.
    /// Registry entries change only once the transaction commits.
    pub async fn revert(&self, after: Option<&str>, up_to: &str) -> MigrateResult<RevertReport> {
        let upper = parse_version(up_to)?;
        let lower = after.map(parse_version).transpose()?;

        let mut targets: Vec<Migration> = self
            .list()?
            .into_iter()
            .filter(|m| m.status == MigrationStatus::Completed)
            .filter(|m| {
                parse_version(&m.version)
                    .map(|v| v <= upper && lower.as_ref().is_none_or(|l| v > *l))
                    .unwrap_or(false)
            })
            .collect();
        targets.reverse();

        let mut report = RevertReport::default();
        if targets.is_empty() {
            return Ok(report);
        }

        let mut txn = self
            .db
            .begin()
            .await
            .map_err(|source| MigrateError::Database { step: "begin", source })?;

        let mut reverted = Vec::new();
        for m in targets {
            let Some(sql) = down_sql(&m) else {
                warn!(version = %m.version, name = %m.name, "no down migration; skipping");
                report.skipped.push(m.version.clone());
                continue;
            };
            if let Err(e) = txn.execute(&sql).await {
                if let Err(rollback) = txn.rollback().await {
                    warn!(version = %m.version, error = %format!("{rollback:#}"), "revert rollback failed");
                }
                return Err(MigrateError::RevertFailed {
                    migration: m.name.clone(),
                    cause: format!("{e:#}"),
                });
            }
            debug!(version = %m.version, "down migration applied");
            report.reverted.push(m.version.clone());
            reverted.push(m);
        }

        txn.commit()
            .await
            .map_err(|source| MigrateError::Database { step: "commit", source })?;

        for m in reverted {
            let mut reset = m;
            reset.status = MigrationStatus::Pending;
            reset.completed_at = None;
            self.state.put_migration(&reset)?;
        }

        info!(reverted = report.reverted.len(), skipped = report.skipped.len(), "migrations reverted");
        Ok(report)
    }
}

/// Why applying a single migration stopped.
#[derive(Debug, Error)]
enum ApplyError {
    #[error("{0:#}")]
    Statement(#[from] anyhow::Error),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}
