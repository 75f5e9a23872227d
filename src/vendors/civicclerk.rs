//! CivicClerk adapter - OData events API.
//!
//! Cities using CivicClerk: Montpelier VT, Burlington VT, and others. The
//! events endpoint takes OData date filters; the packet is whichever
//! published file is typed "Agenda Packet" or "Agenda", downloaded through
//! the stream-file endpoint.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::error::SyncError;
use crate::filters::should_skip_meeting;
use crate::http::HttpSession;
use crate::types::{AgendaSource, FetchedMeeting, PacketUrl};
use crate::vendors::{parse_meeting_status, SyncWindow, VendorAdapter};

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    value: Vec<Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Event {
    id: i64,
    #[serde(default)]
    event_name: String,
    #[serde(default)]
    start_date_time: String,
    #[serde(default)]
    published_files: Vec<PublishedFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishedFile {
    #[serde(rename = "type", default)]
    file_type: String,
    file_id: Option<i64>,
}

pub struct CivicClerkAdapter {
    slug: String,
    base_url: String,
    http: HttpSession,
}

impl CivicClerkAdapter {
    pub fn new(slug: &str) -> Result<Self, SyncError> {
        if slug.is_empty() {
            return Err(SyncError::Configuration(
                "city slug required for civicclerk".to_string(),
            ));
        }
        Ok(CivicClerkAdapter {
            slug: slug.to_string(),
            base_url: format!("https://{}.api.civicclerk.com", slug),
            http: HttpSession::new()?,
        })
    }

    fn packet_url(&self, file_id: i64) -> String {
        format!(
            "{}/v1/Meetings/GetMeetingFileStream(fileId={},plainText=false)",
            self.base_url, file_id
        )
    }
}

#[async_trait]
impl VendorAdapter for CivicClerkAdapter {
    fn vendor(&self) -> &'static str {
        "civicclerk"
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn fetch_meetings(&self, window: SyncWindow) -> Result<Vec<FetchedMeeting>, SyncError> {
        let now = Utc::now();
        let start = now - Duration::days(window.days_back);
        let end = now + Duration::days(window.days_forward);

        let filter = format!(
            "startDateTime gt {} and startDateTime lt {}",
            start.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            end.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        );

        log::debug!(
            "[civicclerk:{}] Fetching meetings from {} to {}",
            self.slug,
            start.date_naive(),
            end.date_naive()
        );

        let api_url = format!("{}/v1/Events", self.base_url);
        let response = self
            .http
            .get_with_query(
                &api_url,
                &[
                    ("$filter", filter.as_str()),
                    ("$orderby", "startDateTime asc, eventName asc"),
                ],
            )
            .await?;

        let events: EventsResponse = response.json().await.map_err(|e| SyncError::BadPayload {
            vendor: "civicclerk",
            detail: e.to_string(),
        })?;

        log::info!(
            "[civicclerk:{}] Retrieved {} meetings",
            self.slug,
            events.value.len()
        );

        let mut results = Vec::new();

        for event in events.value {
            let title = event.event_name.clone();
            if should_skip_meeting(&title) {
                continue;
            }

            let status = parse_meeting_status(&title, Some(&event.start_date_time));

            let packet = event
                .published_files
                .iter()
                .find(|f| matches!(f.file_type.as_str(), "Agenda Packet" | "Agenda"))
                .and_then(|f| f.file_id);

            let source = match packet {
                Some(file_id) => AgendaSource::Packet {
                    packet_url: PacketUrl::Single(self.packet_url(file_id)),
                },
                None => {
                    let types: Vec<&str> = event
                        .published_files
                        .iter()
                        .map(|f| f.file_type.as_str())
                        .collect();
                    log::debug!(
                        "[civicclerk:{}] No packet for: {}, available files: {:?}",
                        self.slug,
                        title,
                        types
                    );
                    AgendaSource::None
                }
            };

            results.push(FetchedMeeting {
                meeting_id: event.id.to_string(),
                title,
                start: Some(event.start_date_time),
                status,
                source,
                participation: None,
                location: None,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_url_shape() {
        let adapter = CivicClerkAdapter::new("montpeliervt").expect("adapter");
        assert_eq!(
            adapter.packet_url(42),
            "https://montpeliervt.api.civicclerk.com/v1/Meetings/GetMeetingFileStream(fileId=42,plainText=false)"
        );
    }

    #[test]
    fn test_event_deserialization_selects_packet() {
        let json = r#"{"value": [{
            "id": 9,
            "eventName": "City Council",
            "startDateTime": "2025-06-03T18:30:00Z",
            "publishedFiles": [
                {"type": "Minutes", "fileId": 1},
                {"type": "Agenda Packet", "fileId": 2}
            ]
        }]}"#;
        let events: EventsResponse = serde_json::from_str(json).expect("parse");
        let event = &events.value[0];
        let packet = event
            .published_files
            .iter()
            .find(|f| matches!(f.file_type.as_str(), "Agenda Packet" | "Agenda"))
            .and_then(|f| f.file_id);
        assert_eq!(packet, Some(2));
    }

    #[test]
    fn test_construction_requires_slug() {
        assert!(CivicClerkAdapter::new("").is_err());
    }
}
