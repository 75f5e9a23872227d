//! Agenda item persistence.
//!
//! Attachments are stored as a JSON column; topics as a JSON array. Item
//! upserts preserve existing summaries the same way meeting upserts do.

use rusqlite::{params, Row};

use super::Database;
use crate::error::DbError;
use crate::types::AgendaItem;

const ITEM_COLUMNS: &str = "id, meeting_id, title, sequence, attachments, summary, topics, \
     matter_id, matter_file, matter_type, sponsors, section, item_number";

fn item_from_row(row: &Row<'_>) -> Result<AgendaItem, rusqlite::Error> {
    let attachments: String = row.get(4)?;
    let topics: Option<String> = row.get(6)?;
    let sponsors: Option<String> = row.get(10)?;

    Ok(AgendaItem {
        id: row.get(0)?,
        meeting_id: row.get(1)?,
        title: row.get(2)?,
        sequence: row.get(3)?,
        attachments: serde_json::from_str(&attachments).unwrap_or_default(),
        summary: row.get(5)?,
        topics: topics.and_then(|t| serde_json::from_str(&t).ok()),
        matter_id: row.get(7)?,
        matter_file: row.get(8)?,
        matter_type: row.get(9)?,
        sponsors: sponsors.and_then(|s| serde_json::from_str(&s).ok()),
        section: row.get(11)?,
        item_number: row.get(12)?,
    })
}

impl Database {
    /// Store a batch of agenda items for a meeting. Returns the stored count.
    pub fn store_agenda_items(&self, items: &[AgendaItem]) -> Result<usize, DbError> {
        self.with_transaction(|db| {
            let mut stored = 0;
            for item in items {
                let attachments = serde_json::to_string(&item.attachments)
                    .map_err(|e| DbError::Corrupt(format!("attachments serialization: {}", e)))?;
                let sponsors = item
                    .sponsors
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| DbError::Corrupt(format!("sponsors serialization: {}", e)))?;

                db.conn_ref().execute(
                    "INSERT INTO agenda_items
                        (id, meeting_id, title, sequence, attachments, matter_id,
                         matter_file, matter_type, sponsors, section, item_number)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title,
                        sequence = excluded.sequence,
                        attachments = excluded.attachments,
                        matter_id = excluded.matter_id,
                        matter_file = excluded.matter_file,
                        matter_type = excluded.matter_type,
                        sponsors = excluded.sponsors,
                        section = excluded.section,
                        item_number = excluded.item_number",
                    params![
                        item.id,
                        item.meeting_id,
                        item.title,
                        item.sequence,
                        attachments,
                        item.matter_id,
                        item.matter_file,
                        item.matter_type,
                        sponsors,
                        item.section,
                        item.item_number,
                    ],
                )?;
                stored += 1;
            }
            Ok(stored)
        })
    }

    /// All items for a meeting in agenda order.
    pub fn get_agenda_items(&self, meeting_id: &str) -> Result<Vec<AgendaItem>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {} FROM agenda_items WHERE meeting_id = ?1 ORDER BY sequence",
            ITEM_COLUMNS
        ))?;
        let rows = stmt.query_map(params![meeting_id], item_from_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Write an item's summary and normalized topics after LLM processing.
    pub fn update_agenda_item_summary(
        &self,
        item_id: &str,
        summary: &str,
        topics: &[String],
    ) -> Result<(), DbError> {
        let topics_json = serde_json::to_string(topics)
            .map_err(|e| DbError::Corrupt(format!("topics serialization: {}", e)))?;
        self.conn_ref().execute(
            "UPDATE agenda_items SET summary = ?2, topics = ?3 WHERE id = ?1",
            params![item_id, summary, topics_json],
        )?;
        Ok(())
    }
}
