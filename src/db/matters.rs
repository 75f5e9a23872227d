//! Legislative matter tracking.
//!
//! Matters are persistent dockets that appear as items across multiple
//! meetings (a rezoning ordinance heard at committee, then council, then a
//! final vote). Materialized as ID-keyed tables with unidirectional foreign
//! keys; appearances are a join table, never embedded.

use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::DbError;

/// A persistent legislative docket.
#[derive(Debug, Clone)]
pub struct Matter {
    pub id: String,
    pub banana: String,
    pub matter_file: Option<String>,
    pub matter_type: Option<String>,
    pub title: String,
    pub canonical_summary: Option<String>,
    pub canonical_topics: Option<Vec<String>>,
    pub sponsors: Option<Vec<String>>,
    pub appearance_count: i64,
}

impl Database {
    /// Record a matter sighting from an agenda item. Creates the matter on
    /// first sight; bumps `last_seen`/`appearance_count` afterwards. The
    /// canonical summary/topics are written once and not recomputed on later
    /// appearances.
    pub fn record_matter_appearance(
        &self,
        matter_id: &str,
        banana: &str,
        title: &str,
        matter_file: Option<&str>,
        matter_type: Option<&str>,
        meeting_id: &str,
        item_id: &str,
    ) -> Result<(), DbError> {
        self.with_transaction(|db| {
            let exists: Option<String> = db
                .conn_ref()
                .query_row(
                    "SELECT id FROM city_matters WHERE id = ?1",
                    params![matter_id],
                    |row| row.get(0),
                )
                .optional()?;

            if exists.is_some() {
                db.conn_ref().execute(
                    "UPDATE city_matters
                     SET last_seen = datetime('now'),
                         appearance_count = appearance_count + 1
                     WHERE id = ?1",
                    params![matter_id],
                )?;
            } else {
                db.conn_ref().execute(
                    "INSERT INTO city_matters
                        (id, banana, matter_file, matter_type, title, first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'), datetime('now'))",
                    params![matter_id, banana, matter_file, matter_type, title],
                )?;
            }

            db.conn_ref().execute(
                "INSERT OR IGNORE INTO matter_appearances
                    (matter_id, meeting_id, item_id, appeared_at)
                 VALUES (?1, ?2, ?3, datetime('now'))",
                params![matter_id, meeting_id, item_id],
            )?;
            Ok(())
        })
    }

    /// Write the canonical summary for a matter, if it doesn't already have
    /// one. First processed appearance wins.
    pub fn set_matter_canonical_summary(
        &self,
        matter_id: &str,
        summary: &str,
        topics: &[String],
    ) -> Result<(), DbError> {
        let topics_json = serde_json::to_string(topics)
            .map_err(|e| DbError::Corrupt(format!("topics serialization: {}", e)))?;
        self.conn_ref().execute(
            "UPDATE city_matters
             SET canonical_summary = COALESCE(canonical_summary, ?2),
                 canonical_topics = COALESCE(canonical_topics, ?3)
             WHERE id = ?1",
            params![matter_id, summary, topics_json],
        )?;
        Ok(())
    }

    pub fn get_matter(&self, matter_id: &str) -> Result<Option<Matter>, DbError> {
        let matter = self
            .conn_ref()
            .query_row(
                "SELECT id, banana, matter_file, matter_type, title,
                        canonical_summary, canonical_topics, sponsors, appearance_count
                 FROM city_matters WHERE id = ?1",
                params![matter_id],
                |row| {
                    let topics: Option<String> = row.get(6)?;
                    let sponsors: Option<String> = row.get(7)?;
                    Ok(Matter {
                        id: row.get(0)?,
                        banana: row.get(1)?,
                        matter_file: row.get(2)?,
                        matter_type: row.get(3)?,
                        title: row.get(4)?,
                        canonical_summary: row.get(5)?,
                        canonical_topics: topics.and_then(|t| serde_json::from_str(&t).ok()),
                        sponsors: sponsors.and_then(|s| serde_json::from_str(&s).ok()),
                        appearance_count: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(matter)
    }
}
