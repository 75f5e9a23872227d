//! Core domain types shared across the pipeline.
//!
//! The store owns all entity state; adapters produce [`FetchedMeeting`]
//! values, and the conductor hands them to the store, which is the only
//! writer. `AgendaSource` is the tagged discriminator between item-level and
//! monolithic meetings - downstream code matches on it instead of probing
//! for optional fields.

use serde::{Deserialize, Serialize};

/// Derive the deterministic city identity key.
///
/// `banana = lowercase(alnum(name)) + UPPER(state)`, e.g.
/// `("Palo Alto", "ca")` → `"paloaltoCA"`. Immutable for the city's life;
/// a rename rebuilds it and cascades to foreign keys.
pub fn banana_for(name: &str, state: &str) -> String {
    let city: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    format!("{}{}", city, state.trim().to_uppercase())
}

/// Meeting-management vendors with first-class adapters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Primegov,
    Civicclerk,
    Legistar,
    Granicus,
    Novusagenda,
    Civicplus,
    /// City-specific scraper (e.g. `custom_menlopark`). Not synced by the
    /// conductor's steady-state loop.
    #[serde(untagged)]
    Custom(String),
}

impl Vendor {
    pub fn as_str(&self) -> &str {
        match self {
            Vendor::Primegov => "primegov",
            Vendor::Civicclerk => "civicclerk",
            Vendor::Legistar => "legistar",
            Vendor::Granicus => "granicus",
            Vendor::Novusagenda => "novusagenda",
            Vendor::Civicplus => "civicplus",
            Vendor::Custom(name) => name,
        }
    }

    pub fn parse(s: &str) -> Vendor {
        match s {
            "primegov" => Vendor::Primegov,
            "civicclerk" => Vendor::Civicclerk,
            "legistar" => Vendor::Legistar,
            "granicus" => Vendor::Granicus,
            "novusagenda" => Vendor::Novusagenda,
            "civicplus" => Vendor::Civicplus,
            other => Vendor::Custom(other.to_string()),
        }
    }

    /// Vendors the conductor syncs in its steady-state loop.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Vendor::Custom(_))
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A city registered for syncing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub banana: String,
    pub name: String,
    pub state: String,
    pub vendor: Vendor,
    /// Vendor-specific handle (e.g. "cityofpaloalto" at primegov).
    pub slug: String,
    pub county: Option<String>,
    pub zipcodes: Vec<String>,
    /// "active" cities are synced; anything else is skipped.
    pub status: String,
}

/// Meeting status parsed from title/time keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Cancelled,
    Postponed,
    Rescheduled,
    Revised,
    Deferred,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Cancelled => "cancelled",
            MeetingStatus::Postponed => "postponed",
            MeetingStatus::Rescheduled => "rescheduled",
            MeetingStatus::Revised => "revised",
            MeetingStatus::Deferred => "deferred",
        }
    }

    pub fn parse(s: &str) -> Option<MeetingStatus> {
        match s {
            "cancelled" => Some(MeetingStatus::Cancelled),
            "postponed" => Some(MeetingStatus::Postponed),
            "rescheduled" => Some(MeetingStatus::Rescheduled),
            "revised" => Some(MeetingStatus::Revised),
            "deferred" => Some(MeetingStatus::Deferred),
            _ => None,
        }
    }
}

/// Lifecycle of a meeting through the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Complete => "complete",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ProcessingStatus> {
        match s {
            "pending" => Some(ProcessingStatus::Pending),
            "processing" => Some(ProcessingStatus::Processing),
            "complete" => Some(ProcessingStatus::Complete),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

/// Attachment document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Pdf,
    Doc,
    /// Raw text carved out of a larger packet by the chunker. Carries its
    /// content inline instead of a fetchable URL.
    TextSegment,
    Unknown,
}

/// A document linked from an agenda item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    /// Inline text, only for `TextSegment` attachments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_page: Option<u32>,
}

impl Attachment {
    pub fn pdf(name: impl Into<String>, url: impl Into<String>) -> Attachment {
        Attachment {
            name: name.into(),
            url: Some(url.into()),
            kind: AttachmentKind::Pdf,
            content: None,
            start_page: None,
        }
    }

    pub fn text_segment(content: impl Into<String>, start_page: Option<u32>) -> Attachment {
        Attachment {
            name: "Text segment".to_string(),
            url: None,
            kind: AttachmentKind::TextSegment,
            content: Some(content.into()),
            start_page,
        }
    }
}

/// Source of truth for a meeting's packet. A handful of cities publish the
/// agenda as several PDFs; the list form canonicalizes to a sorted JSON array
/// so different orderings hit the same cache and queue rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PacketUrl {
    Single(String),
    Many(Vec<String>),
}

impl PacketUrl {
    /// Canonical key used for queue uniqueness and cache lookup.
    pub fn canonical_key(&self) -> String {
        match self {
            PacketUrl::Single(url) => url.clone(),
            PacketUrl::Many(urls) => {
                let mut sorted = urls.clone();
                sorted.sort();
                serde_json::to_string(&sorted).unwrap_or_default()
            }
        }
    }

    /// All URLs, in stored order.
    pub fn urls(&self) -> Vec<&str> {
        match self {
            PacketUrl::Single(url) => vec![url.as_str()],
            PacketUrl::Many(urls) => urls.iter().map(|u| u.as_str()).collect(),
        }
    }

    /// Parse a stored key back into a packet URL. A leading `[` marks the
    /// JSON-array form.
    pub fn from_stored(s: &str) -> PacketUrl {
        if s.starts_with('[') {
            if let Ok(urls) = serde_json::from_str::<Vec<String>>(s) {
                return PacketUrl::Many(urls);
            }
        }
        PacketUrl::Single(s.to_string())
    }
}

/// Participation contact info extracted regex-first from agenda text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Normalized to `+1XXXXXXXXXX`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_hybrid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_virtual_only: Option<bool>,
}

impl ParticipationInfo {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.phone.is_none()
            && self.virtual_url.is_none()
            && self.meeting_id.is_none()
            && self.is_hybrid.is_none()
            && self.is_virtual_only.is_none()
    }
}

/// A stored meeting row.
#[derive(Debug, Clone)]
pub struct Meeting {
    pub id: String,
    pub banana: String,
    pub title: String,
    pub date: Option<chrono::DateTime<chrono::Utc>>,
    pub packet_url: Option<PacketUrl>,
    pub agenda_url: Option<String>,
    pub summary: Option<String>,
    pub topics: Option<Vec<String>>,
    pub status: Option<MeetingStatus>,
    pub processing_status: ProcessingStatus,
    pub processing_method: Option<String>,
    pub processing_time: Option<f64>,
    pub participation: Option<ParticipationInfo>,
    pub location: Option<String>,
}

/// A stored agenda item row.
#[derive(Debug, Clone)]
pub struct AgendaItem {
    /// `{meeting_id}_{vendor_item_id}` or `{meeting_id}_item_{sequence}` for
    /// parser-derived items.
    pub id: String,
    pub meeting_id: String,
    pub title: String,
    pub sequence: i64,
    pub attachments: Vec<Attachment>,
    pub summary: Option<String>,
    pub topics: Option<Vec<String>>,
    pub matter_id: Option<String>,
    pub matter_file: Option<String>,
    pub matter_type: Option<String>,
    pub sponsors: Option<Vec<String>>,
    pub section: Option<String>,
    pub item_number: Option<String>,
}

impl AgendaItem {
    /// Compose the stable item id from a vendor-supplied item id.
    pub fn compose_id(meeting_id: &str, vendor_item_id: &str) -> String {
        format!("{}_{}", meeting_id, vendor_item_id)
    }

    /// Compose the stable item id for a parser-detected item.
    pub fn compose_detected_id(meeting_id: &str, sequence: i64) -> String {
        format!("{}_item_{}", meeting_id, sequence)
    }
}

// ---------------------------------------------------------------------------
// Adapter output contract
// ---------------------------------------------------------------------------

/// Agenda item as produced by a vendor adapter, before storage.
#[derive(Debug, Clone, Default)]
pub struct FetchedItem {
    pub vendor_item_id: String,
    pub title: String,
    /// 1-based insertion order.
    pub sequence: i64,
    pub attachments: Vec<Attachment>,
    pub matter_id: Option<String>,
    pub matter_file: Option<String>,
    pub matter_type: Option<String>,
    pub sponsors: Vec<String>,
    pub agenda_number: Option<String>,
}

/// Where a fetched meeting's content lives.
#[derive(Debug, Clone)]
pub enum AgendaSource {
    /// The vendor exposes structured items; `agenda_url` points at the source
    /// document they were extracted from.
    Items {
        agenda_url: Option<String>,
        items: Vec<FetchedItem>,
    },
    /// Monolithic packet only.
    Packet { packet_url: PacketUrl },
    /// Nothing processable - stored for display only.
    None,
}

impl AgendaSource {
    pub fn has_items(&self) -> bool {
        matches!(self, AgendaSource::Items { items, .. } if !items.is_empty())
    }
}

/// Meeting as produced by a vendor adapter.
#[derive(Debug, Clone)]
pub struct FetchedMeeting {
    /// Vendor-provided id, or the deterministic 8-char fallback hash.
    pub meeting_id: String,
    pub title: String,
    /// Raw start string as the vendor published it; parsed downstream.
    pub start: Option<String>,
    pub status: Option<MeetingStatus>,
    pub source: AgendaSource,
    pub participation: Option<ParticipationInfo>,
    pub location: Option<String>,
}

impl FetchedMeeting {
    pub fn packet_url(&self) -> Option<&PacketUrl> {
        match &self.source {
            AgendaSource::Packet { packet_url } => Some(packet_url),
            _ => None,
        }
    }

    pub fn agenda_url(&self) -> Option<&str> {
        match &self.source {
            AgendaSource::Items { agenda_url, .. } => agenda_url.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banana_derivation() {
        assert_eq!(banana_for("Palo Alto", "CA"), "paloaltoCA");
        assert_eq!(banana_for("St. Paul", "mn"), "stpaulMN");
        assert_eq!(banana_for("Winston-Salem", "NC"), "winstonsalemNC");
        assert_eq!(banana_for("O'Fallon", "MO"), "ofallonMO");
    }

    #[test]
    fn test_vendor_roundtrip() {
        for s in [
            "primegov",
            "civicclerk",
            "legistar",
            "granicus",
            "novusagenda",
            "civicplus",
        ] {
            let v = Vendor::parse(s);
            assert_eq!(v.as_str(), s);
            assert!(v.is_supported());
        }

        let custom = Vendor::parse("custom_menlopark");
        assert_eq!(custom.as_str(), "custom_menlopark");
        assert!(!custom.is_supported());
    }

    #[test]
    fn test_packet_url_canonical_key_single() {
        let p = PacketUrl::Single("https://example.com/packet.pdf".into());
        assert_eq!(p.canonical_key(), "https://example.com/packet.pdf");
    }

    #[test]
    fn test_packet_url_canonical_key_sorts_lists() {
        let a = PacketUrl::Many(vec!["https://b.pdf".into(), "https://a.pdf".into()]);
        let b = PacketUrl::Many(vec!["https://a.pdf".into(), "https://b.pdf".into()]);
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert!(a.canonical_key().starts_with('['));
    }

    #[test]
    fn test_packet_url_from_stored_roundtrip() {
        let many = PacketUrl::Many(vec!["https://a.pdf".into(), "https://b.pdf".into()]);
        let key = many.canonical_key();
        assert_eq!(PacketUrl::from_stored(&key), many);

        let single = PacketUrl::Single("https://a.pdf".into());
        assert_eq!(PacketUrl::from_stored("https://a.pdf"), single);
    }

    #[test]
    fn test_item_id_composition() {
        assert_eq!(AgendaItem::compose_id("m1", "42"), "m1_42");
        assert_eq!(AgendaItem::compose_detected_id("m1", 3), "m1_item_3");
    }

    #[test]
    fn test_attachment_json_shape() {
        let att = Attachment::pdf("Staff Report", "https://example.com/report.pdf");
        let json = serde_json::to_value(&att).unwrap();
        assert_eq!(json["type"], "pdf");
        assert_eq!(json["name"], "Staff Report");
        assert!(json.get("content").is_none());

        let seg = Attachment::text_segment("body text", Some(4));
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["type"], "text_segment");
        assert_eq!(json["content"], "body text");
        assert_eq!(json["start_page"], 4);
    }

    #[test]
    fn test_participation_is_empty() {
        let mut p = ParticipationInfo::default();
        assert!(p.is_empty());
        p.email = Some("clerk@city.gov".into());
        assert!(!p.is_empty());
    }
}
