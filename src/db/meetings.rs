//! Meeting persistence.
//!
//! Sync upserts are idempotent keyed by `Meeting.id` and never clobber
//! enrichment fields (summary, topics, processing state) - those belong to
//! the processor. Meetings are never deleted; history is preserved.

use chrono::DateTime;
use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::error::DbError;
use crate::types::{
    Meeting, MeetingStatus, PacketUrl, ParticipationInfo, ProcessingStatus,
};

const MEETING_COLUMNS: &str = "id, banana, title, date, packet_url, agenda_url, summary, topics, \
     status, processing_status, processing_method, processing_time, participation, location";

fn meeting_from_row(row: &Row<'_>) -> Result<Meeting, rusqlite::Error> {
    let date: Option<String> = row.get(3)?;
    let packet_url: Option<String> = row.get(4)?;
    let topics: Option<String> = row.get(7)?;
    let status: Option<String> = row.get(8)?;
    let processing_status: String = row.get(9)?;
    let participation: Option<String> = row.get(12)?;

    Ok(Meeting {
        id: row.get(0)?,
        banana: row.get(1)?,
        title: row.get(2)?,
        date: date.and_then(|d| DateTime::parse_from_rfc3339(&d).ok().map(|d| d.to_utc())),
        packet_url: packet_url.map(|u| PacketUrl::from_stored(&u)),
        agenda_url: row.get(5)?,
        summary: row.get(6)?,
        topics: topics.and_then(|t| serde_json::from_str(&t).ok()),
        status: status.as_deref().and_then(MeetingStatus::parse),
        processing_status: ProcessingStatus::parse(&processing_status)
            .unwrap_or(ProcessingStatus::Pending),
        processing_method: row.get(10)?,
        processing_time: row.get(11)?,
        participation: participation.and_then(|p| serde_json::from_str(&p).ok()),
        location: row.get(13)?,
    })
}

impl Database {
    /// Insert or update a meeting from sync. Enrichment fields are left to
    /// the processor; re-running a sync with no upstream change produces an
    /// identical row.
    pub fn upsert_meeting(&self, meeting: &Meeting) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO meetings
                (id, banana, title, date, packet_url, agenda_url, status,
                 processing_status, location)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                date = excluded.date,
                packet_url = excluded.packet_url,
                agenda_url = excluded.agenda_url,
                status = excluded.status,
                location = excluded.location,
                updated_at = datetime('now')",
            params![
                meeting.id,
                meeting.banana,
                meeting.title,
                meeting.date.map(|d| d.to_rfc3339()),
                meeting.packet_url.as_ref().map(|p| p.canonical_key()),
                meeting.agenda_url,
                meeting.status.map(|s| s.as_str()),
                meeting.processing_status.as_str(),
                meeting.location,
            ],
        )?;
        Ok(())
    }

    pub fn get_meeting(&self, id: &str) -> Result<Option<Meeting>, DbError> {
        let meeting = self
            .conn_ref()
            .query_row(
                &format!("SELECT {} FROM meetings WHERE id = ?1", MEETING_COLUMNS),
                params![id],
                meeting_from_row,
            )
            .optional()?;
        Ok(meeting)
    }

    pub fn get_meeting_by_packet_url(&self, packet_url: &str) -> Result<Option<Meeting>, DbError> {
        let meeting = self
            .conn_ref()
            .query_row(
                &format!(
                    "SELECT {} FROM meetings WHERE packet_url = ?1",
                    MEETING_COLUMNS
                ),
                params![packet_url],
                meeting_from_row,
            )
            .optional()?;
        Ok(meeting)
    }

    /// Write the processor's output. The store is never left with a summary
    /// set while `processing_status` is not `complete` - both change in one
    /// statement.
    pub fn update_meeting_summary(
        &self,
        meeting_id: &str,
        summary: &str,
        processing_method: &str,
        processing_time: f64,
        topics: Option<&[String]>,
        participation: Option<&ParticipationInfo>,
    ) -> Result<(), DbError> {
        let topics_json = topics
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::Corrupt(format!("topics serialization: {}", e)))?;
        let participation_json = participation
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::Corrupt(format!("participation serialization: {}", e)))?;

        self.conn_ref().execute(
            "UPDATE meetings SET
                summary = ?2,
                processing_method = ?3,
                processing_time = ?4,
                topics = COALESCE(?5, topics),
                participation = COALESCE(?6, participation),
                processing_status = 'complete',
                updated_at = datetime('now')
             WHERE id = ?1",
            params![
                meeting_id,
                summary,
                processing_method,
                processing_time,
                topics_json,
                participation_json,
            ],
        )?;
        Ok(())
    }

    /// Flip processing status without touching enrichment fields.
    pub fn set_meeting_processing_status(
        &self,
        meeting_id: &str,
        status: ProcessingStatus,
    ) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE meetings SET processing_status = ?2, updated_at = datetime('now')
             WHERE id = ?1",
            params![meeting_id, status.as_str()],
        )?;
        Ok(())
    }

    /// Meetings with a packet but no summary yet, most recent first.
    pub fn get_unprocessed_meetings(&self, limit: i64) -> Result<Vec<Meeting>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {} FROM meetings
             WHERE summary IS NULL AND packet_url IS NOT NULL
               AND processing_status != 'failed'
             ORDER BY date DESC
             LIMIT ?1",
            MEETING_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit], meeting_from_row)?;
        let mut meetings = Vec::new();
        for row in rows {
            meetings.push(row?);
        }
        Ok(meetings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use chrono::Utc;

    fn sample_meeting(id: &str) -> Meeting {
        Meeting {
            id: id.to_string(),
            banana: "paloaltoCA".to_string(),
            title: "City Council Regular Meeting".to_string(),
            date: Some(Utc::now()),
            packet_url: Some(PacketUrl::Single(
                "https://cityofpaloalto.primegov.com/Public/CompiledDocument?meetingTemplateId=1"
                    .to_string(),
            )),
            agenda_url: None,
            summary: None,
            topics: None,
            status: None,
            processing_status: ProcessingStatus::Pending,
            processing_method: None,
            processing_time: None,
            participation: None,
            location: None,
        }
    }

    #[test]
    fn test_upsert_and_get_meeting() {
        let db = test_db();
        let meeting = sample_meeting("mtg-001");
        db.upsert_meeting(&meeting).expect("upsert");

        let loaded = db.get_meeting("mtg-001").expect("get").expect("exists");
        assert_eq!(loaded.title, "City Council Regular Meeting");
        assert_eq!(loaded.processing_status, ProcessingStatus::Pending);
        assert!(loaded.summary.is_none());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let db = test_db();
        let meeting = sample_meeting("mtg-002");
        db.upsert_meeting(&meeting).expect("first");
        db.upsert_meeting(&meeting).expect("second");

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM meetings", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_resync_preserves_summary() {
        let db = test_db();
        let meeting = sample_meeting("mtg-003");
        db.upsert_meeting(&meeting).expect("upsert");

        db.update_meeting_summary(
            "mtg-003",
            "A summary",
            "tier1_pdf_text",
            2.5,
            Some(&["housing".to_string()]),
            None,
        )
        .expect("summarize");

        // Re-sync the same meeting
        db.upsert_meeting(&meeting).expect("resync");

        let loaded = db.get_meeting("mtg-003").expect("get").expect("exists");
        assert_eq!(loaded.summary.as_deref(), Some("A summary"));
        assert_eq!(loaded.processing_status, ProcessingStatus::Complete);
        assert_eq!(loaded.topics, Some(vec!["housing".to_string()]));
    }

    #[test]
    fn test_summary_and_status_change_together() {
        let db = test_db();
        db.upsert_meeting(&sample_meeting("mtg-004")).expect("upsert");

        db.update_meeting_summary("mtg-004", "Done", "item_level_3_items", 10.0, None, None)
            .expect("update");

        let (summary, status): (Option<String>, String) = db
            .conn_ref()
            .query_row(
                "SELECT summary, processing_status FROM meetings WHERE id = 'mtg-004'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("row");
        assert!(summary.is_some());
        assert_eq!(status, "complete");
    }

    #[test]
    fn test_get_meeting_by_packet_url_uses_canonical_key() {
        let db = test_db();
        let mut meeting = sample_meeting("mtg-005");
        meeting.packet_url = Some(PacketUrl::Many(vec![
            "https://b.example.com/2.pdf".to_string(),
            "https://a.example.com/1.pdf".to_string(),
        ]));
        db.upsert_meeting(&meeting).expect("upsert");

        let key = PacketUrl::Many(vec![
            "https://a.example.com/1.pdf".to_string(),
            "https://b.example.com/2.pdf".to_string(),
        ])
        .canonical_key();

        let loaded = db
            .get_meeting_by_packet_url(&key)
            .expect("get")
            .expect("exists");
        assert_eq!(loaded.id, "mtg-005");
    }

    #[test]
    fn test_unprocessed_meetings_excludes_summarized_and_failed() {
        let db = test_db();
        db.upsert_meeting(&sample_meeting("mtg-a")).expect("a");

        let mut done = sample_meeting("mtg-b");
        done.packet_url = Some(PacketUrl::Single("https://done.pdf".into()));
        db.upsert_meeting(&done).expect("b");
        db.update_meeting_summary("mtg-b", "s", "m", 1.0, None, None)
            .expect("summarize b");

        let mut failed = sample_meeting("mtg-c");
        failed.packet_url = Some(PacketUrl::Single("https://failed.pdf".into()));
        db.upsert_meeting(&failed).expect("c");
        db.set_meeting_processing_status("mtg-c", ProcessingStatus::Failed)
            .expect("fail c");

        let unprocessed = db.get_unprocessed_meetings(10).expect("query");
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].id, "mtg-a");
    }

    #[test]
    fn test_meeting_status_roundtrip() {
        let db = test_db();
        let mut meeting = sample_meeting("mtg-006");
        meeting.status = Some(MeetingStatus::Cancelled);
        db.upsert_meeting(&meeting).expect("upsert");

        let loaded = db.get_meeting("mtg-006").expect("get").expect("exists");
        assert_eq!(loaded.status, Some(MeetingStatus::Cancelled));
    }
}
