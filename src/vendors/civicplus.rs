//! CivicPlus adapter - agenda discovery and scraping for CivicPlus CMS sites.
//!
//! CivicPlus cities publish agendas under a handful of URL patterns
//! (/AgendaCenter, /Calendar.aspx, ...). Some links are direct
//! `ViewFile/Agenda/...` PDFs that yield meetings without a detail page.
//! Many CivicPlus cities actually link out to an external agenda system
//! (Granicus, Municode, Legistar...) - detected and warned about, never
//! re-routed: fixing the city's vendor assignment is an operator action.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};

use crate::error::SyncError;
use crate::filters::should_skip_meeting;
use crate::http::HttpSession;
use crate::types::{AgendaSource, FetchedMeeting, PacketUrl};
use crate::vendors::{absolutize_url, parse_meeting_status, parse_vendor_date, SyncWindow, VendorAdapter};

const AGENDA_URL_PATTERNS: &[&str] = &[
    "/AgendaCenter",
    "/Calendar.aspx",
    "/calendar",
    "/meetings",
    "/agendas",
];

const KNOWN_EXTERNAL_SYSTEMS: &[(&str, &str)] = &[
    ("municodemeetings.com", "municode"),
    ("granicus.com", "granicus"),
    ("legistar.com", "legistar"),
    ("primegov.com", "primegov"),
    ("civicclerk.com", "civicclerk"),
    ("novusagenda.com", "novusagenda"),
    ("iqm2.com", "iqm2"),
];

pub struct CivicPlusAdapter {
    slug: String,
    base_url: String,
    http: HttpSession,
}

impl CivicPlusAdapter {
    pub fn new(slug: &str) -> Result<Self, SyncError> {
        if slug.is_empty() {
            return Err(SyncError::Configuration(
                "city slug required for civicplus".to_string(),
            ));
        }
        Ok(CivicPlusAdapter {
            slug: slug.to_string(),
            base_url: format!("https://{}.civicplus.com", slug),
            http: HttpSession::new()?,
        })
    }

    /// Warn when the homepage links agendas out to a known external vendor.
    async fn check_for_external_system(&self) {
        let html = match self.http.get_text(&self.base_url).await {
            Ok(html) => html,
            Err(e) => {
                log::debug!(
                    "[civicplus:{}] could not check for external system: {}",
                    self.slug,
                    e
                );
                return;
            }
        };

        if let Some(vendor) = detect_external_system(&html) {
            log::warn!(
                "[civicplus:{}] city uses external agenda system '{}' - update city config to use the correct adapter",
                self.slug,
                vendor
            );
        }
    }

    async fn find_agenda_url(&self) -> Option<String> {
        for pattern in AGENDA_URL_PATTERNS {
            let test_url = format!("{}{}", self.base_url, pattern);
            match self.http.get_text(&test_url).await {
                Ok(body) => {
                    let lower = body.to_lowercase();
                    if lower.contains("agenda") || lower.contains("meeting") {
                        log::info!(
                            "[civicplus:{}] found agenda page at {}",
                            self.slug,
                            pattern
                        );
                        return Some(test_url);
                    }
                }
                Err(_) => continue,
            }
        }
        log::warn!("[civicplus:{}] could not find agenda page", self.slug);
        None
    }

    async fn scrape_meeting_page(&self, url: &str, title: &str) -> Option<FetchedMeeting> {
        let html = match self.http.get_text(url).await {
            Ok(html) => html,
            Err(e) => {
                log::warn!(
                    "[civicplus:{}] failed to scrape meeting page {}: {}",
                    self.slug,
                    url,
                    e
                );
                return None;
            }
        };

        let date_text =
            extract_date_from_page(&html).or_else(|| extract_date_from_title(title));
        let parsed_date = date_text.as_deref().and_then(parse_vendor_date);

        let pdfs = discover_pdfs(&html, url, &["agenda", "packet", "minutes"]);
        if pdfs.is_empty() {
            log::debug!(
                "[civicplus:{}] no PDFs found for meeting {}",
                self.slug,
                title
            );
        }

        let status = parse_meeting_status(title, date_text.as_deref());

        let source = match pdfs.into_iter().next() {
            Some(pdf) => AgendaSource::Packet {
                packet_url: PacketUrl::Single(pdf),
            },
            None => AgendaSource::None,
        };

        Some(FetchedMeeting {
            meeting_id: extract_meeting_id(url),
            title: title.to_string(),
            start: parsed_date.map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string()),
            status,
            source,
            participation: None,
            location: None,
        })
    }
}

#[async_trait]
impl VendorAdapter for CivicPlusAdapter {
    fn vendor(&self) -> &'static str {
        "civicplus"
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn fetch_meetings(&self, window: SyncWindow) -> Result<Vec<FetchedMeeting>, SyncError> {
        self.check_for_external_system().await;

        let Some(agenda_url) = self.find_agenda_url().await else {
            log::error!(
                "[civicplus:{}] no agenda page found - cannot fetch meetings",
                self.slug
            );
            return Ok(Vec::new());
        };

        let html = self.http.get_text(&agenda_url).await?;
        let links = extract_meeting_links(&html, &agenda_url);
        log::info!(
            "[civicplus:{}] found {} meeting links",
            self.slug,
            links.len()
        );

        let now = Utc::now().naive_utc();
        let start_date = now - Duration::days(window.days_back);
        let end_date = now + Duration::days(window.days_forward);

        let in_range = |meeting: &FetchedMeeting| -> bool {
            // Undated meetings are kept; dropping them risks losing real
            // meetings to a formatting quirk
            let Some(start) = &meeting.start else {
                return true;
            };
            match NaiveDateTime::parse_from_str(start, "%Y-%m-%dT%H:%M:%S") {
                Ok(date) => date >= start_date && date <= end_date,
                Err(_) => true,
            }
        };

        let mut results = Vec::new();
        for link in links {
            if should_skip_meeting(&link.title) {
                continue;
            }

            let meeting = if link.url.contains("/ViewFile/Agenda/") {
                // Direct file link: the URL is the packet, no detail page
                Some(meeting_from_viewfile_link(&link))
            } else {
                self.scrape_meeting_page(&link.url, &link.title).await
            };

            if let Some(meeting) = meeting {
                if in_range(&meeting) {
                    results.push(meeting);
                }
            }
        }

        log::info!(
            "[civicplus:{}] {} meetings in date range {} to {}",
            self.slug,
            results.len(),
            start_date.date(),
            end_date.date()
        );
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// HTML parsing (sync, DOM never crosses an await)
// ---------------------------------------------------------------------------

struct MeetingLink {
    url: String,
    title: String,
}

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector parses")
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn detect_external_system(html: &str) -> Option<&'static str> {
    let doc = Html::parse_document(html);
    let link_sel = sel("a[href]");

    for link in doc.select(&link_sel) {
        let text = text_of(link).to_lowercase();
        if !["agenda", "meeting", "minutes"]
            .iter()
            .any(|w| text.contains(w))
        {
            continue;
        }
        let href = link.value().attr("href").unwrap_or("");
        if !href.starts_with("http") || href.contains("civicplus.com") {
            continue;
        }
        let Ok(parsed) = url::Url::parse(href) else {
            continue;
        };
        let domain = parsed.host_str().unwrap_or("");
        for (pattern, vendor) in KNOWN_EXTERNAL_SYSTEMS {
            if domain.contains(pattern) {
                return Some(vendor);
            }
        }
    }
    None
}

fn month_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]* \d{1,2},? \d{4}\b")
            .expect("regex")
    })
}

fn numeric_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").expect("regex"))
}

/// Meeting links: direct ViewFile links, or anything whose text carries a
/// date. Navigation links are skipped.
fn extract_meeting_links(html: &str, base_url: &str) -> Vec<MeetingLink> {
    let doc = Html::parse_document(html);
    let link_sel = sel("a[href]");

    let mut links = Vec::new();
    for link in doc.select(&link_sel) {
        let text = text_of(link);
        let href = link.value().attr("href").unwrap_or("");

        if text.starts_with("Back to") || text == "Agendas & Minutes" || text.starts_with('◄') {
            continue;
        }

        let is_viewfile = href.contains("/ViewFile/Agenda/") || href.contains("/ViewFile/Item/");
        let has_date = month_date_re().is_match(&text) || numeric_date_re().is_match(&text);

        if is_viewfile || has_date {
            links.push(MeetingLink {
                url: absolutize_url(base_url, href),
                title: text,
            });
        }
    }
    links
}

fn meeting_from_viewfile_link(link: &MeetingLink) -> FetchedMeeting {
    let date_text = extract_date_from_title(&link.title);
    let parsed_date = date_text.as_deref().and_then(parse_vendor_date);
    let status = parse_meeting_status(&link.title, date_text.as_deref());

    FetchedMeeting {
        meeting_id: extract_meeting_id(&link.url),
        title: link.title.clone(),
        start: parsed_date.map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string()),
        status,
        source: AgendaSource::Packet {
            packet_url: PacketUrl::Single(link.url.clone()),
        },
        participation: None,
        location: None,
    }
}

fn extract_date_from_page(html: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\s+\d{1,2}:\d{2}\s*[APap][Mm]\b").expect("regex"),
            Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").expect("regex"),
            Regex::new(r"\b[A-Z][a-z]+ \d{1,2}, \d{4}\s+\d{1,2}:\d{2}\s*[APap][Mm]\b")
                .expect("regex"),
            Regex::new(r"\b[A-Z][a-z]+ \d{1,2}, \d{4}\b").expect("regex"),
        ]
    });

    let doc = Html::parse_document(html);
    let text: String = doc.root_element().text().collect::<Vec<_>>().join(" ");
    for re in patterns.iter() {
        if let Some(m) = re.find(&text) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

fn extract_date_from_title(title: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"\b[A-Z][a-z]+\s+\d{1,2},?\s+\d{4}\b").expect("regex"),
            Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").expect("regex"),
        ]
    });

    for re in patterns.iter() {
        if let Some(m) = re.find(title) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

/// PDF links on a page, filtered by link keywords and absolutized.
fn discover_pdfs(html: &str, base_url: &str, keywords: &[&str]) -> Vec<String> {
    let doc = Html::parse_document(html);
    let link_sel = sel("a[href]");

    let mut pdfs = Vec::new();
    for link in doc.select(&link_sel) {
        let href = link.value().attr("href").unwrap_or("");
        let text = text_of(link).to_lowercase();

        let is_pdf = href.to_lowercase().contains(".pdf")
            || link
                .value()
                .attr("type")
                .is_some_and(|t| t.to_lowercase().contains("pdf"))
            || keywords.iter().any(|kw| text.contains(kw));

        if is_pdf {
            pdfs.push(absolutize_url(base_url, href));
        }
    }
    pdfs
}

/// Meeting ID from the URL's id parameter, else a URL hash.
fn extract_meeting_id(url: &str) -> String {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    let id_re = ID_RE.get_or_init(|| Regex::new(r"id=(\d+)").expect("regex"));

    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(query) = parsed.query() {
            if let Some(caps) = id_re.captures(query) {
                return format!("civic_{}", &caps[1]);
            }
        }
    }

    let digest = Sha256::digest(url.as_bytes());
    format!("civic_{}", hex::encode(&digest[..4]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_external_system() {
        let html = r#"<html><body>
            <a href="https://cityname.granicus.com/ViewPublisher.php?view_id=3">Meeting Agendas</a>
        </body></html>"#;
        assert_eq!(detect_external_system(html), Some("granicus"));

        let html = r#"<html><body>
            <a href="/AgendaCenter">Agendas & Minutes</a>
        </body></html>"#;
        assert_eq!(detect_external_system(html), None);
    }

    #[test]
    fn test_extract_meeting_links_viewfile_and_dated() {
        let html = r#"<html><body>
            <a href="/AgendaCenter/ViewFile/Agenda/_06032025-123">June 3, 2025 Regular Meeting</a>
            <a href="/AgendaCenter/Detail/456">City Council 06/10/2025</a>
            <a href="/AgendaCenter">Back to Agenda Center</a>
            <a href="/contact">Contact Us</a>
        </body></html>"#;

        let links = extract_meeting_links(html, "https://cityname.civicplus.com/AgendaCenter");
        assert_eq!(links.len(), 2);
        assert!(links[0].url.contains("/ViewFile/Agenda/"));
        assert!(links[1].title.contains("06/10/2025"));
    }

    #[test]
    fn test_viewfile_link_yields_packet_meeting() {
        let link = MeetingLink {
            url: "https://cityname.civicplus.com/AgendaCenter/ViewFile/Agenda/_06032025-123"
                .to_string(),
            title: "June 3, 2025 Regular Meeting".to_string(),
        };
        let meeting = meeting_from_viewfile_link(&link);
        assert!(matches!(meeting.source, AgendaSource::Packet { .. }));
        assert!(meeting.start.as_deref().unwrap().starts_with("2025-06-03"));
    }

    #[test]
    fn test_extract_date_from_title_variants() {
        assert_eq!(
            extract_date_from_title("October 22, 2025 Regular Meeting").as_deref(),
            Some("October 22, 2025")
        );
        assert_eq!(
            extract_date_from_title("Meeting on 10/22/2025").as_deref(),
            Some("10/22/2025")
        );
        assert!(extract_date_from_title("Regular Meeting").is_none());
    }

    #[test]
    fn test_extract_meeting_id_from_query_or_hash() {
        assert_eq!(
            extract_meeting_id("https://x.civicplus.com/Detail?id=456"),
            "civic_456"
        );

        let hashed = extract_meeting_id("https://x.civicplus.com/ViewFile/Agenda/_06032025-123");
        assert!(hashed.starts_with("civic_"));
        assert_eq!(
            hashed,
            extract_meeting_id("https://x.civicplus.com/ViewFile/Agenda/_06032025-123"),
            "hash ids must be stable"
        );
    }

    #[test]
    fn test_discover_pdfs_filters_and_absolutizes() {
        let html = r#"<html><body>
            <a href="/files/packet.pdf">Download</a>
            <a href="/Detail/1">Agenda for the meeting</a>
            <a href="/unrelated">Parks page</a>
        </body></html>"#;
        let pdfs = discover_pdfs(html, "https://x.civicplus.com/page", &["agenda", "packet"]);
        assert_eq!(pdfs.len(), 2);
        assert!(pdfs[0].starts_with("https://x.civicplus.com/"));
    }
}
