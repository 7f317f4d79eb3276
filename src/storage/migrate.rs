//! Schema bootstrap and ledger-tracked migrations

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::schema::{self, Migration};
use crate::{Error, Result};

/// Outcome of one `initialize` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Migrations applied during this run, in order
    pub applied: Vec<String>,
    /// Migrations already recorded in the ledger
    pub skipped: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

impl std::fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.applied.is_empty() {
            return write!(f, "Schema up to date ({} migrations already applied)", self.skipped);
        }
        writeln!(f, "Applied {} migration(s):", self.applied.len())?;
        for name in &self.applied {
            writeln!(f, "  {}", name)?;
        }
        write!(f, "Previously applied: {}", self.skipped)
    }
}

/// Creates the ledger and base tables, then applies pending migrations
pub struct SchemaMigrator {
    migrations: Vec<Migration>,
}

impl Default for SchemaMigrator {
    fn default() -> Self {
        Self::with_migrations(schema::MIGRATIONS)
    }
}

impl SchemaMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom migration list instead of the built-in one
    pub fn with_migrations(migrations: &[Migration]) -> Self {
        let mut migrations = migrations.to_vec();
        migrations.sort_by(|a, b| a.name.cmp(b.name));
        Self { migrations }
    }

    /// Bring the database up to date. Safe to call repeatedly.
    ///
    /// A failing migration is rolled back and returned as `Error::Migration`;
    /// later migrations are not attempted.
    pub fn initialize(&self, conn: &mut Connection) -> Result<MigrationReport> {
        conn.execute_batch(schema::CREATE_MIGRATIONS_TABLE)?;
        self.create_base_tables(conn)?;

        let applied = self.applied_migrations(conn)?;
        let mut report = MigrationReport::default();

        for migration in &self.migrations {
            if applied.contains(migration.name) {
                report.skipped += 1;
                continue;
            }
            if self.apply(conn, migration)? {
                report.applied.push(migration.name.to_string());
            } else {
                report.skipped += 1;
            }
        }

        if !report.applied.is_empty() {
            tracing::info!("Applied {} migration(s)", report.applied.len());
        }
        Ok(report)
    }

    /// Names recorded in the ledger
    pub fn applied_migrations(&self, conn: &Connection) -> Result<HashSet<String>> {
        let mut stmt = conn.prepare("SELECT name FROM migrations ORDER BY id")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(names)
    }

    fn create_base_tables(&self, conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for stmt in schema::base_table_statements() {
            tx.execute_batch(stmt)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Apply one migration atomically. Returns false if another connection
    /// recorded it first.
    fn apply(&self, conn: &mut Connection, migration: &Migration) -> Result<bool> {
        let failed = |source: rusqlite::Error| {
            tracing::error!("Failed to apply migration {}: {}", migration.name, source);
            Error::Migration {
                name: migration.name.to_string(),
                source,
            }
        };

        // Dropping the transaction on any error path rolls it back
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(failed)?;
        let recorded = tx
            .query_row("SELECT 1 FROM migrations WHERE name = ?1", [migration.name], |_| Ok(()))
            .optional()
            .map_err(failed)?
            .is_some();
        if recorded {
            return Ok(false);
        }

        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?1, ?2)",
            params![migration.name, Utc::now()],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        tracing::info!("Applied migration: {}", migration.name);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(1))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        names.iter().any(|n| n == column)
    }

    #[test]
    fn test_initialize_creates_schema_and_applies_all() {
        let mut conn = Connection::open_in_memory().unwrap();
        let report = SchemaMigrator::new().initialize(&mut conn).unwrap();

        for table in ["migrations", "users", "polls", "answers", "votes"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
        assert!(column_exists(&conn, "users", "external_ref"));
        assert_eq!(report.applied, vec!["001_add_user_external_ref", "002_add_lookup_indexes"]);
    }

    #[test]
    fn test_initialize_twice_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = SchemaMigrator::new();
        migrator.initialize(&mut conn).unwrap();

        let second = migrator.initialize(&mut conn).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.skipped, schema::MIGRATIONS.len());

        let ledger: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(ledger as usize, schema::MIGRATIONS.len());
    }

    #[test]
    fn test_migrations_apply_in_name_order() {
        let migrations = [
            Migration { name: "002_second", sql: "INSERT INTO trail (step) VALUES ('second');" },
            Migration { name: "001_first", sql: "CREATE TABLE trail (step TEXT); INSERT INTO trail (step) VALUES ('first');" },
        ];
        let mut conn = Connection::open_in_memory().unwrap();
        let report = SchemaMigrator::with_migrations(&migrations).initialize(&mut conn).unwrap();
        assert_eq!(report.applied, vec!["001_first", "002_second"]);

        let mut stmt = conn.prepare("SELECT step FROM trail ORDER BY rowid").unwrap();
        let steps: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(steps, vec!["first", "second"]);
    }

    #[test]
    fn test_failed_migration_leaves_no_partial_effect() {
        let migrations = [
            Migration { name: "001_ok", sql: "CREATE TABLE fine (x INTEGER);" },
            Migration {
                name: "002_broken",
                sql: "CREATE TABLE half_done (x INTEGER); INSERT INTO no_such_table VALUES (1);",
            },
            Migration { name: "003_never", sql: "CREATE TABLE never (x INTEGER);" },
        ];
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = SchemaMigrator::with_migrations(&migrations);

        match migrator.initialize(&mut conn) {
            Err(Error::Migration { name, .. }) => assert_eq!(name, "002_broken"),
            other => panic!("expected migration failure, got {:?}", other),
        }

        assert!(table_exists(&conn, "fine"));
        assert!(!table_exists(&conn, "half_done"));
        assert!(!table_exists(&conn, "never"));

        let applied = migrator.applied_migrations(&conn).unwrap();
        assert!(applied.contains("001_ok"));
        assert!(!applied.contains("002_broken"));
    }
}
