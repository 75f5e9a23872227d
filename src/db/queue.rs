//! Persistent processing queue.
//!
//! The queue decouples discovery (sync) from enrichment (processing). Rows
//! are unique by canonicalized `packet_url`; re-enqueuing a known URL is a
//! no-op unless the prior entry failed and the caller resets it. Pull order
//! is priority-first, FIFO within a priority. The retry budget is 3; the
//! third failure is permanent and excludes the row from subsequent pulls.

use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::error::DbError;

pub const MAX_RETRIES: i64 = 3;

/// A row in the processing queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub packet_url: String,
    pub meeting_id: String,
    pub banana: String,
    pub status: String,
    pub priority: i64,
    pub retry_count: i64,
    pub error_message: Option<String>,
}

fn entry_from_row(row: &Row<'_>) -> Result<QueueEntry, rusqlite::Error> {
    Ok(QueueEntry {
        id: row.get(0)?,
        packet_url: row.get(1)?,
        meeting_id: row.get(2)?,
        banana: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        retry_count: row.get(6)?,
        error_message: row.get(7)?,
    })
}

const ENTRY_COLUMNS: &str =
    "id, packet_url, meeting_id, banana, status, priority, retry_count, error_message";

impl Database {
    /// Enqueue a packet for processing. Duplicate URLs are ignored unless the
    /// existing row failed, in which case it is reset for another attempt.
    /// Returns true if a row was inserted or reset.
    pub fn enqueue_for_processing(
        &self,
        packet_url: &str,
        meeting_id: &str,
        banana: &str,
        priority: i64,
    ) -> Result<bool, DbError> {
        let priority = priority.clamp(0, 100);

        let existing: Option<(i64, String)> = self
            .conn_ref()
            .query_row(
                "SELECT id, status FROM processing_queue WHERE packet_url = ?1",
                params![packet_url],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((id, status)) if status == "failed" => {
                self.conn_ref().execute(
                    "UPDATE processing_queue
                     SET status = 'pending', retry_count = 0, error_message = NULL,
                         priority = ?2, started_at = NULL, completed_at = NULL
                     WHERE id = ?1",
                    params![id, priority],
                )?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                self.conn_ref().execute(
                    "INSERT INTO processing_queue (packet_url, meeting_id, banana, priority)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![packet_url, meeting_id, banana, priority],
                )?;
                Ok(true)
            }
        }
    }

    /// Pull the next pending entry and mark it processing. Priority desc,
    /// then created_at asc.
    pub fn get_next_for_processing(
        &self,
        banana: Option<&str>,
    ) -> Result<Option<QueueEntry>, DbError> {
        let entry = match banana {
            Some(b) => self
                .conn_ref()
                .query_row(
                    &format!(
                        "SELECT {} FROM processing_queue
                         WHERE status = 'pending' AND banana = ?1
                         ORDER BY priority DESC, created_at ASC LIMIT 1",
                        ENTRY_COLUMNS
                    ),
                    params![b],
                    entry_from_row,
                )
                .optional()?,
            None => self
                .conn_ref()
                .query_row(
                    &format!(
                        "SELECT {} FROM processing_queue
                         WHERE status = 'pending'
                         ORDER BY priority DESC, created_at ASC LIMIT 1",
                        ENTRY_COLUMNS
                    ),
                    [],
                    entry_from_row,
                )
                .optional()?,
        };

        if let Some(ref entry) = entry {
            self.conn_ref().execute(
                "UPDATE processing_queue
                 SET status = 'processing', started_at = datetime('now')
                 WHERE id = ?1",
                params![entry.id],
            )?;
        }

        Ok(entry)
    }

    pub fn mark_processing_complete(&self, queue_id: i64) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE processing_queue
             SET status = 'completed', completed_at = datetime('now'), error_message = NULL
             WHERE id = ?1",
            params![queue_id],
        )?;
        Ok(())
    }

    /// Record a failure. Increments the retry count; at `MAX_RETRIES` the row
    /// is left permanently failed, otherwise it returns to pending.
    pub fn mark_processing_failed(
        &self,
        queue_id: i64,
        error_message: &str,
        increment_retry: bool,
    ) -> Result<(), DbError> {
        if increment_retry {
            self.conn_ref().execute(
                "UPDATE processing_queue
                 SET retry_count = retry_count + 1,
                     error_message = ?2,
                     status = CASE WHEN retry_count + 1 >= ?3 THEN 'failed' ELSE 'pending' END
                 WHERE id = ?1",
                params![queue_id, error_message, MAX_RETRIES],
            )?;
        } else {
            self.conn_ref().execute(
                "UPDATE processing_queue SET status = 'pending', error_message = ?2
                 WHERE id = ?1",
                params![queue_id, error_message],
            )?;
        }
        Ok(())
    }

    pub fn get_queue_entry(&self, queue_id: i64) -> Result<Option<QueueEntry>, DbError> {
        let entry = self
            .conn_ref()
            .query_row(
                &format!(
                    "SELECT {} FROM processing_queue WHERE id = ?1",
                    ENTRY_COLUMNS
                ),
                params![queue_id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    #[test]
    fn test_enqueue_and_pull() {
        let db = test_db();
        let inserted = db
            .enqueue_for_processing("https://a.pdf", "mtg-1", "paloaltoCA", 50)
            .expect("enqueue");
        assert!(inserted);

        let entry = db
            .get_next_for_processing(None)
            .expect("pull")
            .expect("entry");
        assert_eq!(entry.packet_url, "https://a.pdf");

        // Pulled row is now processing, not pullable again
        assert!(db.get_next_for_processing(None).expect("pull").is_none());
    }

    #[test]
    fn test_duplicate_enqueue_is_noop() {
        let db = test_db();
        db.enqueue_for_processing("https://a.pdf", "mtg-1", "paloaltoCA", 50)
            .expect("first");
        let second = db
            .enqueue_for_processing("https://a.pdf", "mtg-1", "paloaltoCA", 90)
            .expect("second");
        assert!(!second);

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM processing_queue", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_priority_ordering_with_fifo_ties() {
        let db = test_db();
        db.enqueue_for_processing("https://low.pdf", "m1", "x", 10)
            .expect("low");
        db.enqueue_for_processing("https://high.pdf", "m2", "x", 90)
            .expect("high");
        db.enqueue_for_processing("https://high2.pdf", "m3", "x", 90)
            .expect("high2");

        let first = db.get_next_for_processing(None).expect("p").expect("e");
        assert_eq!(first.packet_url, "https://high.pdf");
        let second = db.get_next_for_processing(None).expect("p").expect("e");
        assert_eq!(second.packet_url, "https://high2.pdf");
        let third = db.get_next_for_processing(None).expect("p").expect("e");
        assert_eq!(third.packet_url, "https://low.pdf");
    }

    #[test]
    fn test_priority_clamped_to_range() {
        let db = test_db();
        db.enqueue_for_processing("https://a.pdf", "m1", "x", 250)
            .expect("enqueue");
        let entry = db.get_next_for_processing(None).expect("p").expect("e");
        assert_eq!(entry.priority, 100);
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let db = test_db();
        db.enqueue_for_processing("https://a.pdf", "m1", "x", 50)
            .expect("enqueue");

        for attempt in 1..=MAX_RETRIES {
            let entry = db
                .get_next_for_processing(None)
                .expect("pull")
                .unwrap_or_else(|| panic!("entry should be pullable on attempt {}", attempt));
            db.mark_processing_failed(entry.id, "poor text quality", true)
                .expect("fail");
        }

        // Third failure is permanent
        assert!(db.get_next_for_processing(None).expect("pull").is_none());

        let entry = db.get_queue_entry(1).expect("get").expect("exists");
        assert_eq!(entry.status, "failed");
        assert_eq!(entry.retry_count, MAX_RETRIES);
        assert_eq!(entry.error_message.as_deref(), Some("poor text quality"));
    }

    #[test]
    fn test_reenqueue_resets_failed_entry() {
        let db = test_db();
        db.enqueue_for_processing("https://a.pdf", "m1", "x", 50)
            .expect("enqueue");
        for _ in 0..MAX_RETRIES {
            let entry = db.get_next_for_processing(None).expect("p").expect("e");
            db.mark_processing_failed(entry.id, "err", true).expect("f");
        }

        let reset = db
            .enqueue_for_processing("https://a.pdf", "m1", "x", 70)
            .expect("re-enqueue");
        assert!(reset);

        let entry = db.get_next_for_processing(None).expect("p").expect("e");
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.priority, 70);
    }

    #[test]
    fn test_banana_scoped_pull() {
        let db = test_db();
        db.enqueue_for_processing("https://a.pdf", "m1", "paloaltoCA", 50)
            .expect("a");
        db.enqueue_for_processing("https://b.pdf", "m2", "seattleWA", 90)
            .expect("b");

        let entry = db
            .get_next_for_processing(Some("paloaltoCA"))
            .expect("pull")
            .expect("entry");
        assert_eq!(entry.banana, "paloaltoCA");
    }

    #[test]
    fn test_completed_entry_not_pulled() {
        let db = test_db();
        db.enqueue_for_processing("https://a.pdf", "m1", "x", 50)
            .expect("enqueue");
        let entry = db.get_next_for_processing(None).expect("p").expect("e");
        db.mark_processing_complete(entry.id).expect("complete");

        assert!(db.get_next_for_processing(None).expect("pull").is_none());
        // Re-enqueue of a completed URL is a no-op
        let again = db
            .enqueue_for_processing("https://a.pdf", "m1", "x", 50)
            .expect("re-enqueue");
        assert!(!again);
    }
}
