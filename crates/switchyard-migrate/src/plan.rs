//! Turning a migration into SQL statements.

use switchyard_state::{Migration, MigrationKind};

/// How schema changes are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MigrationMode {
    /// Additive change, batched backfill, then constraints; indexes built
    /// concurrently. Avoids long table locks.
    #[default]
    Online,
    /// One blocking statement per migration.
    Standard,
}

/// One unit of work against the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Execute(String),
    /// Repeat `sql` until it touches no rows, pausing between batches.
    Backfill(String),
}

/// Statements that apply `migration` in `mode`, in order.
pub fn up_steps(migration: &Migration, mode: MigrationMode, batch_size: u64) -> Vec<Step> {
    match (&migration.kind, mode) {
        (
            MigrationKind::AddColumn {
                table,
                column,
                data_type,
                default_value,
                constraints,
            },
            MigrationMode::Online,
        ) => {
            let mut steps = vec![Step::Execute(format!(
                "ALTER TABLE {table} ADD COLUMN {column} {data_type}"
            ))];
            if let Some(value) = default_value {
                steps.push(Step::Backfill(format!(
                    "UPDATE {table} SET {column} = {value} WHERE id IN \
                     (SELECT id FROM {table} WHERE {column} IS NULL LIMIT {batch_size})"
                )));
            }
            steps.extend(
                constraints
                    .iter()
                    .map(|c| Step::Execute(format!("ALTER TABLE {table} ALTER COLUMN {column} {c}"))),
            );
            steps
        }
        (
            MigrationKind::AddColumn {
                table,
                column,
                data_type,
                default_value,
                constraints,
            },
            MigrationMode::Standard,
        ) => {
            let mut sql = format!("ALTER TABLE {table} ADD COLUMN {column} {data_type}");
            if let Some(value) = default_value {
                sql.push_str(&format!(" DEFAULT {value}"));
            }
            let mut steps = vec![Step::Execute(sql)];
            steps.extend(
                constraints
                    .iter()
                    .map(|c| Step::Execute(format!("ALTER TABLE {table} ALTER COLUMN {column} {c}"))),
            );
            steps
        }
        (
            MigrationKind::CreateIndex {
                table,
                index_name,
                columns,
                unique,
            },
            mode,
        ) => {
            let unique = if *unique { "UNIQUE " } else { "" };
            let concurrently = if mode == MigrationMode::Online { "CONCURRENTLY " } else { "" };
            vec![Step::Execute(format!(
                "CREATE {unique}INDEX {concurrently}{index_name} ON {table} ({})",
                columns.join(", ")
            ))]
        }
        (MigrationKind::Custom { up_sql }, _) => vec![Step::Execute(up_sql.clone())],
    }
}

/// The statement that undoes `migration`, if one is known.
///
/// An explicit `down_sql` wins; structured kinds derive one; `Custom`
/// migrations without `down_sql` have none.
pub fn down_sql(migration: &Migration) -> Option<String> {
    if let Some(sql) = &migration.down_sql {
        return Some(sql.clone());
    }
    match &migration.kind {
        MigrationKind::AddColumn { table, column, .. } => {
            Some(format!("ALTER TABLE {table} DROP COLUMN IF EXISTS {column}"))
        }
        MigrationKind::CreateIndex { index_name, .. } => {
            Some(format!("DROP INDEX CONCURRENTLY IF EXISTS {index_name}"))
        }
        MigrationKind::Custom { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_email(default_value: Option<&str>) -> Migration {
        Migration::pending(
            "1.1.0",
            "add_email",
            MigrationKind::AddColumn {
                table: "users".into(),
                column: "email".into(),
                data_type: "TEXT".into(),
                default_value: default_value.map(str::to_string),
                constraints: vec!["SET NOT NULL".into()],
            },
        )
    }

    #[test]
    fn online_add_column_backfills_then_constrains() {
        let steps = up_steps(&add_email(Some("''")), MigrationMode::Online, 1000);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], Step::Execute("ALTER TABLE users ADD COLUMN email TEXT".into()));
        match &steps[1] {
            Step::Backfill(sql) => {
                assert!(sql.starts_with("UPDATE users SET email = ''"));
                assert!(sql.contains("WHERE email IS NULL LIMIT 1000"));
            }
            other => panic!("expected backfill, got {other:?}"),
        }
        assert_eq!(
            steps[2],
            Step::Execute("ALTER TABLE users ALTER COLUMN email SET NOT NULL".into())
        );
    }

    #[test]
    fn online_add_column_without_default_skips_backfill() {
        let steps = up_steps(&add_email(None), MigrationMode::Online, 1000);
        assert!(steps.iter().all(|s| matches!(s, Step::Execute(_))));
    }

    #[test]
    fn standard_add_column_is_single_statement() {
        let steps = up_steps(&add_email(Some("''")), MigrationMode::Standard, 1000);
        assert_eq!(
            steps[0],
            Step::Execute("ALTER TABLE users ADD COLUMN email TEXT DEFAULT ''".into())
        );
    }

    #[test]
    fn online_index_is_concurrent() {
        let m = Migration::pending(
            "1.2.0",
            "idx",
            MigrationKind::CreateIndex {
                table: "users".into(),
                index_name: "users_email_idx".into(),
                columns: vec!["email".into(), "tenant_id".into()],
                unique: true,
            },
        );
        assert_eq!(
            up_steps(&m, MigrationMode::Online, 1000),
            vec![Step::Execute(
                "CREATE UNIQUE INDEX CONCURRENTLY users_email_idx ON users (email, tenant_id)".into()
            )]
        );
        assert_eq!(down_sql(&m).unwrap(), "DROP INDEX CONCURRENTLY IF EXISTS users_email_idx");
    }

    #[test]
    fn custom_down_requires_explicit_sql() {
        let m = Migration::pending("2.0.0", "seed", MigrationKind::Custom { up_sql: "INSERT 1".into() });
        assert!(down_sql(&m).is_none());
        assert_eq!(down_sql(&m.with_down("DELETE 1")).as_deref(), Some("DELETE 1"));
    }

    #[test]
    fn explicit_down_overrides_derived() {
        let m = add_email(None).with_down("ALTER TABLE users RENAME COLUMN email TO email_old");
        assert!(down_sql(&m).unwrap().contains("RENAME"));
    }
}
