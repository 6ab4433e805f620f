use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use switchyard_migrate::{MemorySchemaDatabase, MigrationRunner, down_sql};
use switchyard_state::{Migration, StateStore};
use tracing::info;

use super::open_store;

/// Registry operations never reach the schema database.
fn runner(store: StateStore) -> MigrationRunner {
    MigrationRunner::new(store, Arc::new(MemorySchemaDatabase::new()))
}

pub fn list(data_dir: &Path) -> anyhow::Result<()> {
    let runner = runner(open_store(data_dir)?);
    let migrations = runner.list()?;
    if migrations.is_empty() {
        println!("No migrations registered.");
        return Ok(());
    }
    for m in &migrations {
        println!("{}", one_line(m));
    }
    if let Some(current) = runner.current_schema_version()? {
        println!("Schema version: {current}");
    }
    Ok(())
}

pub fn add(data_dir: &Path, file: &Path) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let migration: Migration =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", file.display()))?;
    let version = migration.version.clone();
    let name = migration.name.clone();

    runner(open_store(data_dir)?).register(migration)?;
    info!(%version, %name, source = %file.display(), "migration registered from file");
    println!("✓ Registered {version} {name}");
    Ok(())
}

fn one_line(m: &Migration) -> String {
    let down = if down_sql(m).is_some() { "" } else { " (irreversible)" };
    format!("{:<10} {:<32} {:?}{down}", m.version, m.name, m.status)
}
