//! Vendor adapters: per-vendor transforms from remote agenda sources into
//! the uniform [`FetchedMeeting`] stream.
//!
//! Each adapter owns its HTTP session (construction implies open, drop
//! closes). Shared behavior lives here: the multi-format date parser, the
//! status-keyword parser, and the deterministic meeting-id fallback for
//! vendors that don't provide ids.
//!
//! HTML parsing happens in synchronous helper functions that take the page
//! text and return owned values; parsed DOM handles never live across await
//! points.

pub mod civicclerk;
pub mod civicplus;
pub mod granicus;
pub mod legistar;
pub mod novusagenda;
pub mod primegov;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::SyncError;
use crate::types::{City, FetchedMeeting, MeetingStatus, Vendor};

/// Time-window hints for a sync pass.
#[derive(Debug, Clone, Copy)]
pub struct SyncWindow {
    pub days_back: i64,
    pub days_forward: i64,
}

impl Default for SyncWindow {
    fn default() -> Self {
        SyncWindow {
            days_back: 7,
            days_forward: 14,
        }
    }
}

/// One vendor adapter. `fetch_meetings` yields every meeting it can see in
/// the window; per-meeting parse failures are logged and skipped, a failure
/// of the fetch itself surfaces as an error and counts as a sync failure.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    fn vendor(&self) -> &'static str;
    fn slug(&self) -> &str;
    async fn fetch_meetings(&self, window: SyncWindow) -> Result<Vec<FetchedMeeting>, SyncError>;
}

/// Construct the adapter for a city. Fails fast on configuration problems
/// (unknown vendor, Granicus city without a view_id).
pub fn adapter_for(city: &City, config: &Config) -> Result<Box<dyn VendorAdapter>, SyncError> {
    match &city.vendor {
        Vendor::Primegov => Ok(Box::new(primegov::PrimeGovAdapter::new(&city.slug)?)),
        Vendor::Civicclerk => Ok(Box::new(civicclerk::CivicClerkAdapter::new(&city.slug)?)),
        Vendor::Legistar => {
            // NYC's Legistar instance requires an API token
            let token = if city.slug == "nyc" {
                config.nyc_legistar_token.clone()
            } else {
                None
            };
            Ok(Box::new(legistar::LegistarAdapter::new(&city.slug, token)?))
        }
        Vendor::Granicus => Ok(Box::new(granicus::GranicusAdapter::new(
            &city.slug,
            &config.granicus_view_ids_path(),
        )?)),
        Vendor::Novusagenda => Ok(Box::new(novusagenda::NovusAgendaAdapter::new(&city.slug)?)),
        Vendor::Civicplus => Ok(Box::new(civicplus::CivicPlusAdapter::new(&city.slug)?)),
        Vendor::Custom(name) => Err(SyncError::Configuration(format!(
            "no steady-state adapter for custom vendor {}",
            name
        ))),
    }
}

// ---------------------------------------------------------------------------
// Shared parsing helpers
// ---------------------------------------------------------------------------

/// Parse a date string from the formats municipal calendar systems use:
/// ISO 8601, US 12/24-hour, verbose, and date-only. Returns None (not an
/// error) for empty or unparseable input - missing dates are a data
/// condition, not a failure.
pub fn parse_vendor_date(date_str: &str) -> Option<NaiveDateTime> {
    let date_str = date_str.trim();
    if date_str.is_empty() {
        return None;
    }

    const DATETIME_FORMATS: &[&str] = &[
        // ISO formats
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        // US formats with 12-hour time
        "%b %d, %Y %I:%M %p",
        "%B %d, %Y %I:%M %p",
        "%m/%d/%Y %I:%M %p",
        "%m/%d/%Y %I:%M:%S %p",
        "%B %d, %Y at %I:%M %p",
        // US formats with 24-hour time
        "%b %d, %Y %H:%M",
        "%B %d, %Y %H:%M",
        "%m/%d/%Y %H:%M",
    ];

    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d", "%b %d, %Y", "%B %d, %Y", "%m/%d/%Y", "%m/%d/%y",
    ];

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(dt);
        }
    }

    // RFC 3339 with offset (PrimeGov and CivicClerk emit these)
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(date_str) {
        return Some(dt.naive_utc());
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(date_str, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// Parse title and date/time strings for status keywords.
///
/// Keywords are checked in priority order across the title first, then the
/// date field; a later match overrides an earlier one, so
/// "[CANCELLED] ... REVISED" reads as revised, matching how cities stack
/// annotations.
pub fn parse_meeting_status(title: &str, date_str: Option<&str>) -> Option<MeetingStatus> {
    const KEYWORDS: &[(&str, MeetingStatus)] = &[
        ("CANCEL", MeetingStatus::Cancelled),
        ("POSTPONE", MeetingStatus::Postponed),
        ("DEFER", MeetingStatus::Deferred),
        ("RESCHEDULE", MeetingStatus::Rescheduled),
        ("REVISED", MeetingStatus::Revised),
        ("AMENDMENT", MeetingStatus::Revised),
        ("UPDATED", MeetingStatus::Revised),
    ];

    let mut current = None;

    let title_upper = title.to_uppercase();
    for (keyword, status) in KEYWORDS {
        if title_upper.contains(keyword) {
            current = Some(*status);
        }
    }

    if let Some(date_str) = date_str {
        let date_upper = date_str.to_uppercase();
        for (keyword, status) in KEYWORDS {
            if date_upper.contains(keyword) {
                current = Some(*status);
            }
        }
    }

    current
}

/// Deterministic 8-char meeting id for vendors that don't provide one.
/// Hashes `{slug}_{YYYYMMDD|nodate}_{title}[_{type}]` so the same meeting
/// produces the same id across re-syncs. Always prefer vendor ids when
/// available.
pub fn generate_meeting_id(
    slug: &str,
    title: &str,
    date: Option<NaiveDateTime>,
    meeting_type: Option<&str>,
) -> String {
    let date_str = date
        .map(|d| d.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "nodate".to_string());
    let type_str = meeting_type
        .map(|t| format!("_{}", t))
        .unwrap_or_default();
    let id_string = format!("{}_{}_{}{}", slug, date_str, title, type_str);

    let digest = Sha256::digest(id_string.as_bytes());
    hex::encode(&digest[..4])
}

/// Extract a clean matter-file code from an item title via a prioritized
/// regex chain: direct case numbers (`DRH25-00335`), compound codes
/// (`COF 2025 #141` normalized to `COF-2025-141`), then separator-based
/// prefixes. Returns None when the title carries no recognizable code.
pub fn extract_matter_file_code(item_title: &str) -> Option<String> {
    use std::sync::OnceLock;

    static CASE: OnceLock<regex::Regex> = OnceLock::new();
    static COMPOUND: OnceLock<regex::Regex> = OnceLock::new();
    static HASH_SEP: OnceLock<regex::Regex> = OnceLock::new();
    static WS: OnceLock<regex::Regex> = OnceLock::new();

    // 2-5 uppercase letters + 2-digit year + dash + 4-5 digit number
    let case_re =
        CASE.get_or_init(|| regex::Regex::new(r"\b([A-Z]{2,5}\d{2}-\d{4,5})\b").expect("regex"));
    if let Some(caps) = case_re.captures(item_title) {
        return Some(caps[1].to_string());
    }

    // Compound format with spaces: "COF 2025 #141" normalizes to dashes
    let compound_re = COMPOUND
        .get_or_init(|| regex::Regex::new(r"^([A-Z]{2,5})\s+(\d{4})\s+#(\d+)").expect("regex"));
    if let Some(caps) = compound_re.captures(item_title) {
        return Some(format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]));
    }

    // Separator fallback: segment before " / ", or normalized prefix
    // before ":"
    if let Some((prefix, _)) = item_title.split_once(" / ") {
        let prefix = prefix.trim();
        if !prefix.is_empty() {
            return Some(prefix.to_string());
        }
    }
    if let Some((prefix, _)) = item_title.split_once(':') {
        let prefix = prefix.trim();
        if !prefix.is_empty() {
            let hash_re = HASH_SEP.get_or_init(|| regex::Regex::new(r"\s+#\s*").expect("regex"));
            let ws_re = WS.get_or_init(|| regex::Regex::new(r"\s+").expect("regex"));
            let normalized = hash_re.replace_all(prefix, "-");
            return Some(ws_re.replace_all(&normalized, "-").to_string());
        }
    }

    None
}

/// Resolve a possibly-relative href against a base URL.
pub fn absolutize_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iso_dates() {
        assert!(parse_vendor_date("2025-01-22T18:00:00Z").is_some());
        assert!(parse_vendor_date("2025-01-22T18:00:00.000Z").is_some());
        assert!(parse_vendor_date("2025-01-22T18:00:00").is_some());
        assert!(parse_vendor_date("2025-01-22 18:00:00").is_some());
        assert!(parse_vendor_date("2025-01-22").is_some());
    }

    #[test]
    fn test_parse_us_dates() {
        let dt = parse_vendor_date("Jul 22, 2025 6:30 PM").expect("parses");
        assert_eq!(dt.format("%H:%M").to_string(), "18:30");

        assert!(parse_vendor_date("July 22, 2025 6:30 PM").is_some());
        assert!(parse_vendor_date("07/22/2025 6:30 PM").is_some());
        assert!(parse_vendor_date("07/22/2025 18:30").is_some());
        assert!(parse_vendor_date("July 22, 2025").is_some());
        assert!(parse_vendor_date("07/22/25").is_some());
    }

    #[test]
    fn test_parse_date_failures_return_none() {
        assert!(parse_vendor_date("").is_none());
        assert!(parse_vendor_date("TBD").is_none());
        assert!(parse_vendor_date("POSTPONED - TBD").is_none());
    }

    #[test]
    fn test_status_from_title() {
        assert_eq!(
            parse_meeting_status("[CANCELLED] - City Council Meeting", None),
            Some(MeetingStatus::Cancelled)
        );
        assert_eq!(
            parse_meeting_status("(POSTPONED) Regular Meeting", None),
            Some(MeetingStatus::Postponed)
        );
        assert_eq!(
            parse_meeting_status("City Council - REVISED", None),
            Some(MeetingStatus::Revised)
        );
        assert_eq!(
            parse_meeting_status("RESCHEDULED: Planning Commission", None),
            Some(MeetingStatus::Rescheduled)
        );
        assert_eq!(parse_meeting_status("City Council Meeting", None), None);
    }

    #[test]
    fn test_status_from_date_field() {
        assert_eq!(
            parse_meeting_status("Regular Meeting", Some("POSTPONED - TBD")),
            Some(MeetingStatus::Postponed)
        );
    }

    #[test]
    fn test_generate_meeting_id_stable() {
        let date = parse_vendor_date("2025-01-15");
        let a = generate_meeting_id("cityofpaloalto", "City Council", date, None);
        let b = generate_meeting_id("cityofpaloalto", "City Council", date, None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);

        let c = generate_meeting_id("cityofpaloalto", "Planning Commission", date, None);
        assert_ne!(a, c);

        let d = generate_meeting_id("cityofpaloalto", "City Council", date, Some("special"));
        assert_ne!(a, d);
    }

    #[test]
    fn test_generate_meeting_id_without_date() {
        let id = generate_meeting_id("hagerstown", "Mayor and Council", None, None);
        assert_eq!(id.len(), 8);
    }

    #[test]
    fn test_matter_file_code_extraction() {
        assert_eq!(
            extract_matter_file_code("DRH25-00335 / BRS Architects request for design review"),
            Some("DRH25-00335".to_string())
        );
        assert_eq!(
            extract_matter_file_code("Appeal of CUP25-00022 & CVA25-00025 / Request to overturn"),
            Some("CUP25-00022".to_string())
        );
        assert_eq!(
            extract_matter_file_code("COF 2025 #141 : Communication from the City Manager"),
            Some("COF-2025-141".to_string())
        );
        assert_eq!(
            extract_matter_file_code("PLN 2025 #9 : Rezone request"),
            Some("PLN-2025-9".to_string())
        );
        // Separator fallbacks
        assert_eq!(
            extract_matter_file_code("Case 24-188 / Variance request for rear setback"),
            Some("Case 24-188".to_string())
        );
        assert_eq!(
            extract_matter_file_code("Docket 12: Annual fee schedule"),
            Some("Docket-12".to_string())
        );
        assert_eq!(
            extract_matter_file_code("Ordinance establishing permit parking"),
            None
        );
    }

    #[test]
    fn test_absolutize_url() {
        assert_eq!(
            absolutize_url("https://x.novusagenda.com/agendapublic", "/agendapublic/a.pdf"),
            "https://x.novusagenda.com/agendapublic/a.pdf"
        );
        assert_eq!(
            absolutize_url("https://x.example.com", "https://y.example.com/b.pdf"),
            "https://y.example.com/b.pdf"
        );
    }

    #[test]
    fn test_default_window() {
        let w = SyncWindow::default();
        assert_eq!(w.days_back, 7);
        assert_eq!(w.days_forward, 14);
    }
}
