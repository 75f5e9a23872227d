//! Legistar adapter - Web API with XML and HTML-scrape fallbacks.
//!
//! Cities using Legistar: Seattle WA, NYC, Cambridge MA, and many others.
//! The API path walks three layers: events, per-event items, per-matter
//! attachments. Some instances return XML instead of JSON; some reject API
//! access outright (4xx), in which case we scrape the public Calendar.aspx,
//! open each MeetingDetail.aspx for items, and each LegislationDetail.aspx
//! for attachments. At most one "Leg Ver" attachment survives per item
//! (Ver2 preferred over Ver1).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::error::{HttpError, SyncError};
use crate::filters::{filter_leg_ver, should_skip_item, should_skip_meeting};
use crate::http::HttpSession;
use crate::types::{
    AgendaSource, Attachment, AttachmentKind, FetchedItem, FetchedMeeting, PacketUrl,
};
use crate::vendors::{absolutize_url, parse_meeting_status, parse_vendor_date, SyncWindow, VendorAdapter};

const ACCEPT_JSON: &str = "application/json, application/xml;q=0.9, */*;q=0.8";

#[derive(Debug, Deserialize)]
struct ApiEvent {
    #[serde(rename = "EventId")]
    event_id: i64,
    #[serde(rename = "EventBodyName", default)]
    body_name: String,
    #[serde(rename = "EventDate", default)]
    date: String,
    #[serde(rename = "EventLocation")]
    location: Option<String>,
    #[serde(rename = "EventAgendaStatusName", default)]
    agenda_status: String,
    #[serde(rename = "EventAgendaFile")]
    agenda_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEventItem {
    #[serde(rename = "EventItemId")]
    item_id: i64,
    #[serde(rename = "EventItemTitle")]
    title: Option<String>,
    #[serde(rename = "EventItemAgendaSequence")]
    sequence: Option<i64>,
    #[serde(rename = "EventItemMatterId")]
    matter_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiAttachment {
    #[serde(rename = "MatterAttachmentName")]
    name: Option<String>,
    #[serde(rename = "MatterAttachmentHyperlink")]
    hyperlink: Option<String>,
}

pub struct LegistarAdapter {
    slug: String,
    api_token: Option<String>,
    base_url: String,
    http: HttpSession,
}

impl LegistarAdapter {
    pub fn new(slug: &str, api_token: Option<String>) -> Result<Self, SyncError> {
        if slug.is_empty() {
            return Err(SyncError::Configuration(
                "city slug required for legistar".to_string(),
            ));
        }
        Ok(LegistarAdapter {
            slug: slug.to_string(),
            api_token,
            base_url: format!("https://webapi.legistar.com/v1/{}", slug),
            http: HttpSession::new()?,
        })
    }

    fn token_params(&self) -> Vec<(&str, &str)> {
        match &self.api_token {
            Some(token) => vec![("token", token.as_str())],
            None => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // API path
    // -----------------------------------------------------------------------

    async fn fetch_meetings_api(
        &self,
        window: SyncWindow,
    ) -> Result<Vec<FetchedMeeting>, SyncError> {
        let today = Utc::now();
        let end = today + Duration::days(window.days_forward.max(60));

        let filter = format!(
            "EventDate ge datetime'{}' and EventDate lt datetime'{}'",
            today.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        );

        let mut params = vec![
            ("$filter", filter.as_str()),
            ("$orderby", "EventDate asc"),
            ("$top", "1000"),
        ];
        params.extend(self.token_params());

        let url = format!("{}/events", self.base_url);
        let response = self.http.get_accept(&url, &params, ACCEPT_JSON).await?;
        let body = response.text().await.map_err(|e| SyncError::BadPayload {
            vendor: "legistar",
            detail: e.to_string(),
        })?;

        let events: Vec<ApiEvent> = match serde_json::from_str(&body) {
            Ok(events) => {
                let events: Vec<ApiEvent> = events;
                log::info!(
                    "[legistar:{}] Retrieved {} events (JSON)",
                    self.slug,
                    events.len()
                );
                events
            }
            Err(json_error) => match parse_xml_events(&body) {
                Ok(events) => {
                    log::info!(
                        "[legistar:{}] Retrieved {} events (XML)",
                        self.slug,
                        events.len()
                    );
                    events
                }
                Err(xml_error) => {
                    log::error!(
                        "[legistar:{}] Failed to parse events as JSON or XML. JSON error: {}, XML error: {}",
                        self.slug,
                        json_error,
                        xml_error
                    );
                    return Ok(Vec::new());
                }
            },
        };

        let mut results = Vec::new();

        for event in events {
            let title = event.body_name.clone();
            if should_skip_meeting(&title) {
                continue;
            }

            let status = parse_meeting_status(&title, Some(&event.agenda_status));
            let items = self.fetch_event_items(event.event_id).await;

            // Items extracted → agenda_url points at the canonical agenda
            // PDF; no items → that same PDF becomes the monolithic packet
            let source = if !items.is_empty() {
                AgendaSource::Items {
                    agenda_url: event.agenda_file.clone(),
                    items,
                }
            } else if let Some(agenda_pdf) = event.agenda_file.clone() {
                AgendaSource::Packet {
                    packet_url: PacketUrl::Single(agenda_pdf),
                }
            } else {
                log::debug!(
                    "[legistar:{}] No agenda for: {} on {}",
                    self.slug,
                    title,
                    event.date
                );
                AgendaSource::None
            };

            results.push(FetchedMeeting {
                meeting_id: event.event_id.to_string(),
                title,
                start: Some(event.date),
                status,
                source,
                participation: None,
                location: event.location,
            });
        }

        Ok(results)
    }

    async fn fetch_event_items(&self, event_id: i64) -> Vec<FetchedItem> {
        let url = format!("{}/events/{}/eventitems", self.base_url, event_id);
        let params = self.token_params();

        let body = match self.http.get_accept(&url, &params, ACCEPT_JSON).await {
            Ok(response) => match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    log::warn!(
                        "[legistar:{}] Failed reading items for event {}: {}",
                        self.slug,
                        event_id,
                        e
                    );
                    return Vec::new();
                }
            },
            Err(e) => {
                log::warn!(
                    "[legistar:{}] Failed fetching items for event {}: {}",
                    self.slug,
                    event_id,
                    e
                );
                return Vec::new();
            }
        };

        let raw_items: Vec<ApiEventItem> = match serde_json::from_str(&body) {
            Ok(items) => items,
            Err(json_error) => match parse_xml_event_items(&body) {
                Ok(items) => items,
                Err(xml_error) => {
                    log::error!(
                        "[legistar:{}] Failed to parse items for event {} as JSON or XML. JSON error: {}, XML error: {}",
                        self.slug,
                        event_id,
                        json_error,
                        xml_error
                    );
                    return Vec::new();
                }
            },
        };

        let mut items = Vec::new();
        for (idx, raw) in raw_items.iter().enumerate() {
            let title = raw.title.clone().unwrap_or_default().trim().to_string();

            // Procedural items never reach the store
            if should_skip_item(&title, "") {
                continue;
            }

            let attachments = match raw.matter_id {
                Some(matter_id) => self.fetch_matter_attachments(matter_id).await,
                None => Vec::new(),
            };

            items.push(FetchedItem {
                vendor_item_id: raw.item_id.to_string(),
                title,
                sequence: raw.sequence.unwrap_or((idx + 1) as i64),
                attachments,
                matter_id: raw.matter_id.map(|id| id.to_string()),
                ..Default::default()
            });
        }

        let with_attachments = items.iter().filter(|i| !i.attachments.is_empty()).count();
        log::info!(
            "[legistar:{}] Event {}: {} items total, {} with attachments",
            self.slug,
            event_id,
            items.len(),
            with_attachments
        );
        items
    }

    async fn fetch_matter_attachments(&self, matter_id: i64) -> Vec<Attachment> {
        let url = format!("{}/matters/{}/attachments", self.base_url, matter_id);
        let params = self.token_params();

        let body = match self.http.get_accept(&url, &params, ACCEPT_JSON).await {
            Ok(response) => response.text().await.unwrap_or_default(),
            Err(e) => {
                log::warn!(
                    "[legistar:{}] Failed to fetch attachments for matter {}: {}",
                    self.slug,
                    matter_id,
                    e
                );
                return Vec::new();
            }
        };

        let raw: Vec<ApiAttachment> = match serde_json::from_str(&body) {
            Ok(attachments) => attachments,
            Err(_) => parse_xml_attachments(&body).unwrap_or_default(),
        };

        raw.into_iter()
            .filter_map(|att| {
                let url = att.hyperlink?.trim().to_string();
                if url.is_empty() {
                    return None;
                }
                let name = att.name.unwrap_or_default().trim().to_string();
                let kind = attachment_kind_from_url(&url);
                Some(Attachment {
                    name,
                    url: Some(url),
                    kind,
                    content: None,
                    start_page: None,
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // HTML fallback path
    // -----------------------------------------------------------------------

    async fn fetch_meetings_html(
        &self,
        window: SyncWindow,
    ) -> Result<Vec<FetchedMeeting>, SyncError> {
        let calendar_url = format!("https://{}.legistar.com/Calendar.aspx", self.slug);
        let html = self.http.get_text(&calendar_url).await?;
        let html_base = format!("https://{}.legistar.com", self.slug);

        let rows = parse_calendar_rows(&html, &html_base);
        if rows.is_empty() {
            log::warn!(
                "[legistar:{}] No meeting rows found in HTML calendar",
                self.slug
            );
            return Ok(Vec::new());
        }

        log::info!(
            "[legistar:{}] Found {} meetings in HTML calendar",
            self.slug,
            rows.len()
        );

        let today = Utc::now().naive_utc();
        let start = today - Duration::days(window.days_back);
        let end = today + Duration::days(window.days_forward.max(60));

        let mut results = Vec::new();
        for row in rows {
            let Some(date) = row.date else {
                log::debug!(
                    "[legistar:{}] Could not parse date for meeting {}",
                    self.slug,
                    row.meeting_id
                );
                continue;
            };
            if date < start || date > end {
                continue;
            }
            if should_skip_meeting(&row.title) {
                continue;
            }

            // Detail page may be gone for older meetings; keep going with
            // the calendar packet link
            let mut items = Vec::new();
            let mut packet_url = row.packet_url.clone();

            match self.http.get_text(&row.detail_url).await {
                Ok(detail_html) => {
                    let mut stubs = parse_meeting_detail(&detail_html, &html_base);
                    stubs.retain(|stub| !should_skip_item(&stub.title, ""));

                    let mut with_attachments = 0;
                    for stub in stubs {
                        let attachments = match &stub.legislation_url {
                            Some(url) => self.fetch_legislation_attachments(url, &html_base).await,
                            None => Vec::new(),
                        };
                        if !attachments.is_empty() {
                            with_attachments += 1;
                        }
                        items.push(FetchedItem {
                            vendor_item_id: stub.item_id,
                            title: stub.title,
                            sequence: stub.sequence,
                            attachments,
                            matter_file: stub.matter_file,
                            ..Default::default()
                        });
                    }

                    if with_attachments > 0 {
                        log::info!(
                            "[legistar:{}] Meeting {}: {}/{} items have attachments",
                            self.slug,
                            row.meeting_id,
                            with_attachments,
                            items.len()
                        );
                    }

                    if packet_url.is_none() {
                        packet_url = parse_detail_packet_link(&detail_html, &html_base);
                    }
                }
                Err(e) => {
                    log::debug!(
                        "[legistar:{}] Detail page unavailable for meeting {}: {}",
                        self.slug,
                        row.meeting_id,
                        e
                    );
                }
            }

            let source = if !items.is_empty() {
                log::info!(
                    "[legistar:{}] Meeting {}: extracted {} items from HTML",
                    self.slug,
                    row.meeting_id,
                    items.len()
                );
                AgendaSource::Items {
                    agenda_url: packet_url,
                    items,
                }
            } else if let Some(packet) = packet_url {
                AgendaSource::Packet {
                    packet_url: PacketUrl::Single(packet),
                }
            } else {
                log::debug!(
                    "[legistar:{}] Meeting {}: no items or packet available, skipping",
                    self.slug,
                    row.meeting_id
                );
                continue;
            };

            let status = parse_meeting_status(&row.title, None);

            results.push(FetchedMeeting {
                meeting_id: row.meeting_id,
                title: row.title,
                start: Some(date.format("%Y-%m-%dT%H:%M:%S").to_string()),
                status,
                source,
                participation: None,
                location: None,
            });
        }

        log::info!(
            "[legistar:{}] Yielded {} meetings from HTML",
            self.slug,
            results.len()
        );
        Ok(results)
    }

    async fn fetch_legislation_attachments(
        &self,
        legislation_url: &str,
        base_url: &str,
    ) -> Vec<Attachment> {
        match self.http.get_text(legislation_url).await {
            Ok(html) => {
                let attachments = parse_legislation_attachments(&html, base_url);
                filter_leg_ver(attachments, |att| att.name.clone())
            }
            Err(e) => {
                log::warn!(
                    "[legistar:{}] Failed to fetch attachments from {}: {}",
                    self.slug,
                    legislation_url,
                    e
                );
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl VendorAdapter for LegistarAdapter {
    fn vendor(&self) -> &'static str {
        "legistar"
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn fetch_meetings(&self, window: SyncWindow) -> Result<Vec<FetchedMeeting>, SyncError> {
        match self.fetch_meetings_api(window).await {
            Ok(meetings) => Ok(meetings),
            Err(SyncError::Http(HttpError::Status { status, .. }))
                if matches!(status, 400 | 403 | 404) =>
            {
                log::warn!(
                    "[legistar:{}] API failed (HTTP {}), falling back to HTML scraping",
                    self.slug,
                    status
                );
                self.fetch_meetings_html(window).await
            }
            Err(e) => Err(e),
        }
    }
}

fn attachment_kind_from_url(url: &str) -> AttachmentKind {
    let lower = url.to_lowercase();
    if lower.ends_with(".pdf") {
        AttachmentKind::Pdf
    } else if lower.ends_with(".doc") || lower.ends_with(".docx") {
        AttachmentKind::Doc
    } else {
        AttachmentKind::Unknown
    }
}

// ---------------------------------------------------------------------------
// XML fallback parsing
// ---------------------------------------------------------------------------

/// Flatten `<record_tag>` elements into field maps. Legistar's XML wraps the
/// JSON field names in a DataContract namespace; local names match the JSON
/// keys exactly.
fn parse_xml_records(xml: &str, record_tag: &str) -> Result<Vec<HashMap<String, String>>, String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut field: Option<String> = None;
    let mut saw_record = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == record_tag {
                    current = Some(HashMap::new());
                    saw_record = true;
                } else if current.is_some() {
                    field = Some(name);
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(record), Some(field_name)) = (current.as_mut(), field.as_ref()) {
                    let text = t.unescape().map_err(|e| e.to_string())?.to_string();
                    if !text.is_empty() {
                        record.entry(field_name.clone()).or_default().push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == record_tag {
                    if let Some(record) = current.take() {
                        records.push(record);
                    }
                } else if field.as_deref() == Some(name.as_str()) {
                    field = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }

    if !saw_record {
        return Err(format!("no {} elements found", record_tag));
    }
    Ok(records)
}

fn parse_xml_events(xml: &str) -> Result<Vec<ApiEvent>, String> {
    let records = parse_xml_records(xml, "GranicusEvent")?;
    Ok(records
        .into_iter()
        .filter_map(|r| {
            Some(ApiEvent {
                event_id: r.get("EventId")?.parse().ok()?,
                body_name: r.get("EventBodyName").cloned().unwrap_or_default(),
                date: r.get("EventDate").cloned().unwrap_or_default(),
                location: r.get("EventLocation").cloned(),
                agenda_status: r.get("EventAgendaStatusName").cloned().unwrap_or_default(),
                agenda_file: r.get("EventAgendaFile").cloned(),
            })
        })
        .collect())
}

fn parse_xml_event_items(xml: &str) -> Result<Vec<ApiEventItem>, String> {
    let records = parse_xml_records(xml, "GranicusEventItem")?;
    Ok(records
        .into_iter()
        .filter_map(|r| {
            Some(ApiEventItem {
                item_id: r.get("EventItemId")?.parse().ok()?,
                title: r.get("EventItemTitle").cloned(),
                sequence: r.get("EventItemAgendaSequence").and_then(|s| s.parse().ok()),
                matter_id: r.get("EventItemMatterId").and_then(|s| s.parse().ok()),
            })
        })
        .collect())
}

fn parse_xml_attachments(xml: &str) -> Result<Vec<ApiAttachment>, String> {
    let records = parse_xml_records(xml, "GranicusMatterAttachment")?;
    Ok(records
        .into_iter()
        .filter_map(|r| {
            let hyperlink = r.get("MatterAttachmentHyperlink")?;
            Some(ApiAttachment {
                name: r.get("MatterAttachmentName").cloned(),
                hyperlink: Some(hyperlink.clone()),
            })
        })
        .collect())
}

// ---------------------------------------------------------------------------
// HTML fallback parsing (sync, DOM never crosses an await)
// ---------------------------------------------------------------------------

struct CalendarRow {
    meeting_id: String,
    title: String,
    date: Option<chrono::NaiveDateTime>,
    detail_url: String,
    packet_url: Option<String>,
}

struct ItemStub {
    item_id: String,
    title: String,
    sequence: i64,
    matter_file: Option<String>,
    legislation_url: Option<String>,
}

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector parses")
}

fn text_of(el: scraper::ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Walk the Calendar.aspx RadGrid rows into calendar entries.
fn parse_calendar_rows(html: &str, base_url: &str) -> Vec<CalendarRow> {
    let doc = Html::parse_document(html);
    let row_sel = sel("tr.rgRow, tr.rgAltRow");
    let cell_sel = sel("td");
    let link_sel = sel("a[href]");
    let sorted_sel = sel("td.rgSorted");

    let id_re = Regex::new(r"ID=(\d+)").expect("regex");

    let mut rows = Vec::new();

    for row in doc.select(&row_sel) {
        let cells: Vec<scraper::ElementRef> = row.select(&cell_sel).collect();
        if cells.len() < 6 {
            continue;
        }

        let Some(detail_link) = row.select(&link_sel).find(|a| {
            a.value()
                .attr("href")
                .is_some_and(|h| h.contains("MeetingDetail.aspx"))
        }) else {
            continue;
        };

        let detail_href = detail_link.value().attr("href").unwrap_or("");
        let detail_url = absolutize_url(base_url, detail_href);
        let Some(caps) = id_re.captures(&detail_url) else {
            continue;
        };
        let meeting_id = caps[1].to_string();

        // Title: hypBody anchor (SF), else first cell's anchor, else the
        // detail link text
        let mut title = row
            .select(&link_sel)
            .find(|a| a.value().attr("id").is_some_and(|id| id.contains("hypBody")))
            .map(text_of)
            .filter(|t| !t.is_empty());
        if title.is_none() {
            title = cells
                .first()
                .and_then(|c| c.select(&link_sel).next())
                .map(text_of)
                .filter(|t| !t.is_empty());
        }
        let mut title = title.unwrap_or_else(|| text_of(detail_link));
        if title.is_empty() || title == "Details" {
            title = "Meeting".to_string();
        }

        // Date: rgSorted cell first, then scan every cell
        let mut date = row
            .select(&sorted_sel)
            .next()
            .and_then(|c| parse_vendor_date(&text_of(c)));
        if date.is_none() {
            for cell in &cells {
                if let Some(parsed) = parse_vendor_date(&text_of(*cell)) {
                    date = Some(parsed);
                    break;
                }
            }
        }

        // Agenda PDF from the calendar row (fallback when the detail page
        // is unavailable)
        let packet_url = row
            .select(&link_sel)
            .find(|a| {
                a.value().attr("href").is_some_and(|h| {
                    h.contains("View.ashx") && (h.contains("M=A") || h.to_lowercase().contains("agenda"))
                })
            })
            .and_then(|a| a.value().attr("href"))
            .map(|h| absolutize_url(base_url, h));

        rows.push(CalendarRow {
            meeting_id,
            title,
            date,
            detail_url,
            packet_url,
        });
    }

    rows
}

/// Walk a MeetingDetail.aspx page's item rows. Each row links its matter
/// file to LegislationDetail.aspx; the longest cell text is the item title.
fn parse_meeting_detail(html: &str, base_url: &str) -> Vec<ItemStub> {
    let doc = Html::parse_document(html);
    let row_sel = sel("tr.rgRow, tr.rgAltRow");
    let cell_sel = sel("td");
    let link_sel = sel("a[href]");

    let mut stubs = Vec::new();

    for (idx, row) in doc.select(&row_sel).enumerate() {
        let legislation_link = row.select(&link_sel).find(|a| {
            a.value()
                .attr("href")
                .is_some_and(|h| h.contains("LegislationDetail.aspx"))
        });

        let (matter_file, legislation_url) = match legislation_link {
            Some(link) => {
                let href = link.value().attr("href").unwrap_or("");
                let file = text_of(link);
                (
                    if file.is_empty() { None } else { Some(file) },
                    Some(absolutize_url(base_url, href)),
                )
            }
            None => (None, None),
        };

        // Title: the longest cell is the legislative title column
        let title = row
            .select(&cell_sel)
            .map(text_of)
            .max_by_key(|t| t.len())
            .unwrap_or_default();
        if title.is_empty() {
            continue;
        }

        let item_id = matter_file
            .clone()
            .unwrap_or_else(|| format!("row{}", idx + 1));

        stubs.push(ItemStub {
            item_id,
            title,
            sequence: (idx + 1) as i64,
            matter_file,
            legislation_url,
        });
    }

    stubs
}

/// Agenda/packet PDF link on a detail page.
fn parse_detail_packet_link(html: &str, base_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let link_sel = sel("a[href]");

    for link in doc.select(&link_sel) {
        let href = link.value().attr("href")?;
        if !href.to_lowercase().contains(".pdf") {
            continue;
        }
        let text = text_of(link).to_lowercase();
        if text.contains("agenda") || text.contains("packet") {
            return Some(absolutize_url(base_url, href));
        }
    }
    None
}

/// Attachment links from a LegislationDetail.aspx page: View.ashx file
/// links, named by their link text.
fn parse_legislation_attachments(html: &str, base_url: &str) -> Vec<Attachment> {
    let doc = Html::parse_document(html);
    let link_sel = sel("a[href]");

    let mut attachments = Vec::new();
    for link in doc.select(&link_sel) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let is_file_link =
            href.contains("View.ashx") && href.contains("M=F") || href.to_lowercase().ends_with(".pdf");
        if !is_file_link {
            continue;
        }

        let name = text_of(link);
        if name.is_empty() {
            continue;
        }

        let url = absolutize_url(base_url, href);
        attachments.push(Attachment {
            name,
            url: Some(url.clone()),
            kind: if href.to_lowercase().ends_with(".doc") || href.to_lowercase().ends_with(".docx")
            {
                AttachmentKind::Doc
            } else {
                AttachmentKind::Pdf
            },
            content: None,
            start_page: None,
        });
    }
    attachments
}
