//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.

use rusqlite::Connection;

use crate::error::DbError;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/002_matters.sql"),
    },
];

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| DbError::Migration(format!("failed to create schema_version table: {}", e)))
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, DbError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| DbError::Migration(format!("failed to read schema version: {}", e)))
}

/// Apply any pending migrations, in order, each inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    ensure_schema_version_table(conn)?;
    let current = current_version(conn)?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }

        log::info!("Applying migration {:03}", migration.version);

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| DbError::Migration(format!("begin migration tx: {}", e)))?;

        let result = conn.execute_batch(migration.sql).and_then(|_| {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [migration.version],
            )
            .map(|_| ())
        });

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")
                    .map_err(|e| DbError::Migration(format!("commit migration tx: {}", e)))?;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(DbError::Migration(format!(
                    "migration {:03} failed: {}",
                    migration.version, e
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_on_fresh_db() {
        let conn = Connection::open_in_memory().expect("open");
        run_migrations(&conn).expect("migrate");

        let version = current_version(&conn).expect("version");
        assert_eq!(version, MIGRATIONS.last().unwrap().version);

        // Core tables exist
        for table in [
            "cities",
            "zipcodes",
            "meetings",
            "agenda_items",
            "processing_queue",
            "processing_cache",
            "city_matters",
            "matter_appearances",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .unwrap_or_else(|_| panic!("{} table should exist", table));
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run should be a no-op");

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .expect("count");
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
