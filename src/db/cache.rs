//! De-duplicating summary cache.
//!
//! Keyed by the canonicalized packet URL. Hit bookkeeping is a single atomic
//! UPDATE so `hit_count` is monotonically non-decreasing even with racing
//! readers. Cache write failures are logged and non-fatal upstream.

use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::DbError;

/// A cached processing result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub packet_url: String,
    pub summary: String,
    pub processing_time: Option<f64>,
    pub hit_count: i64,
}

impl Database {
    /// Look up a cached summary without touching hit bookkeeping.
    pub fn get_cached_summary(&self, packet_url: &str) -> Result<Option<CacheEntry>, DbError> {
        let entry = self
            .conn_ref()
            .query_row(
                "SELECT packet_url, summary, processing_time, hit_count
                 FROM processing_cache WHERE packet_url = ?1",
                params![packet_url],
                |row| {
                    Ok(CacheEntry {
                        packet_url: row.get(0)?,
                        summary: row.get(1)?,
                        processing_time: row.get(2)?,
                        hit_count: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Record a cache hit: bump the counter and refresh last-accessed in one
    /// statement.
    pub fn record_cache_hit(&self, packet_url: &str) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE processing_cache
             SET hit_count = hit_count + 1, last_accessed = datetime('now')
             WHERE packet_url = ?1",
            params![packet_url],
        )?;
        Ok(())
    }

    /// Store a fresh processing result, resetting hit bookkeeping.
    pub fn store_cached_summary(
        &self,
        packet_url: &str,
        summary: &str,
        processing_time: f64,
    ) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT OR REPLACE INTO processing_cache
                (packet_url, summary, processing_time, created_at, last_accessed, hit_count)
             VALUES (?1, ?2, ?3, datetime('now'), datetime('now'), 0)",
            params![packet_url, summary, processing_time],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::test_db;

    #[test]
    fn test_miss_then_store_then_hit() {
        let db = test_db();
        assert!(db
            .get_cached_summary("https://a.pdf")
            .expect("query")
            .is_none());

        db.store_cached_summary("https://a.pdf", "Summary text", 3.2)
            .expect("store");

        let entry = db
            .get_cached_summary("https://a.pdf")
            .expect("query")
            .expect("entry");
        assert_eq!(entry.summary, "Summary text");
        assert_eq!(entry.hit_count, 0);
    }

    #[test]
    fn test_hit_count_monotonic() {
        let db = test_db();
        db.store_cached_summary("https://a.pdf", "s", 1.0)
            .expect("store");

        let mut last = 0;
        for _ in 0..5 {
            db.record_cache_hit("https://a.pdf").expect("hit");
            let entry = db
                .get_cached_summary("https://a.pdf")
                .expect("query")
                .expect("entry");
            assert!(entry.hit_count > last);
            last = entry.hit_count;
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn test_restore_resets_hit_count() {
        let db = test_db();
        db.store_cached_summary("https://a.pdf", "v1", 1.0)
            .expect("store");
        db.record_cache_hit("https://a.pdf").expect("hit");

        db.store_cached_summary("https://a.pdf", "v2", 2.0)
            .expect("restore");
        let entry = db
            .get_cached_summary("https://a.pdf")
            .expect("query")
            .expect("entry");
        assert_eq!(entry.summary, "v2");
        assert_eq!(entry.hit_count, 0);
    }
}
