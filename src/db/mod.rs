//! SQLite-backed store for cities, meetings, items, the processing queue,
//! and the summary cache.
//!
//! The database lives at `<data_dir>/munisync.db` and exclusively owns all
//! entity state. Adapters produce values; the conductor hands them to the
//! store, which assigns surrogate keys where needed and is the only writer.
//! A single connection in WAL mode behind a brief-lock mutex is sufficient:
//! the processor is the sole writer of meeting summary/topics fields and the
//! conductor is the sole writer of cities and the queue state machine.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::DbError;

pub mod cache;
pub mod cities;
pub mod items;
pub mod matters;
pub mod meetings;
pub mod queue;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path and apply migrations.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL for concurrent read performance while the daemon writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Default database path under the user's data directory.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".munisync").join("munisync.db"))
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Aggregate counts for the status surface.
    pub fn stats(&self) -> Result<StoreStats, DbError> {
        let active_cities: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cities WHERE status = 'active'",
            [],
            |r| r.get(0),
        )?;
        let total_meetings: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM meetings", [], |r| r.get(0))?;
        let summarized_meetings: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM meetings WHERE summary IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let pending_meetings: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM meetings WHERE processing_status = 'pending'",
            [],
            |r| r.get(0),
        )?;
        let queued_jobs: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM processing_queue WHERE status = 'pending'",
            [],
            |r| r.get(0),
        )?;

        Ok(StoreStats {
            active_cities,
            total_meetings,
            summarized_meetings,
            pending_meetings,
            queued_jobs,
        })
    }
}

/// Snapshot of store-level counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub active_cities: i64,
    pub total_meetings: i64,
    pub summarized_meetings: i64,
    pub pending_meetings: i64,
    pub queued_jobs: i64,
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::Database;
    use crate::types::{City, Vendor};

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of
    /// the test. Test temp dirs are cleaned up by the OS. FK enforcement is
    /// disabled so unit tests can insert rows without satisfying every
    /// foreign key.
    pub fn test_db() -> Database {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        let db = Database::open(&path).expect("Failed to open test database");
        db.conn_ref()
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .expect("disable FK for tests");
        db
    }

    /// A city fixture used across db tests.
    pub fn sample_city(banana: &str, vendor: Vendor) -> City {
        City {
            banana: banana.to_string(),
            name: "Palo Alto".to_string(),
            state: "CA".to_string(),
            vendor,
            slug: "cityofpaloalto".to_string(),
            county: Some("Santa Clara".to_string()),
            zipcodes: vec!["94301".to_string(), "94306".to_string()],
            status: "active".to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM meetings", [], |row| row.get(0))
            .expect("meetings table should exist");
        assert_eq!(count, 0);

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM processing_queue", [], |row| {
                row.get(0)
            })
            .expect("processing_queue table should exist");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_idempotent_schema_application() {
        // Opening the same DB twice should not error
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("idempotent.db");

        let _db1 = Database::open(&path).expect("first open");
        let _db2 = Database::open(&path).expect("second open should not fail");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();

        let result: Result<(), DbError> = db.with_transaction(|db| {
            db.conn_ref()
                .execute(
                    "INSERT INTO cities (banana, name, state, vendor, slug)
                     VALUES ('xCA', 'X', 'CA', 'primegov', 'x')",
                    [],
                )
                .map_err(DbError::from)?;
            Err(DbError::Corrupt("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM cities", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 0, "insert should have rolled back");
    }

    #[test]
    fn test_stats_empty_store() {
        let db = test_db();
        let stats = db.stats().expect("stats");
        assert_eq!(stats.active_cities, 0);
        assert_eq!(stats.total_meetings, 0);
        assert_eq!(stats.queued_jobs, 0);
    }
}
