//! PrimeGov adapter - JSON portal API plus HTML agenda parsing.
//!
//! Cities using PrimeGov: Palo Alto CA, Mountain View CA, Los Angeles CA,
//! Boulder CO, and many others. The portal API lists upcoming meetings; when
//! a meeting publishes an "HTML Agenda" document we fetch that page and
//! parse items out of it, since items + attachments are addressable there.
//! PDF-only meetings fall back to the compiled packet.
//!
//! The HTML agenda comes in three known layouts:
//! - LA: `meeting-item` wrapper carrying `data-mig`/`data-itemid` and a
//!   matter metadata table
//! - Palo Alto: bare `agenda-item` divs
//! - Boulder: tables keyed by `data-itemid`

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use crate::error::SyncError;
use crate::filters::{should_skip_item, should_skip_meeting};
use crate::http::HttpSession;
use crate::parsing::participation::parse_participation_info;
use crate::types::{
    AgendaSource, Attachment, AttachmentKind, FetchedItem, FetchedMeeting, PacketUrl,
    ParticipationInfo,
};
use crate::vendors::{parse_meeting_status, SyncWindow, VendorAdapter};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortalMeeting {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    date_time: String,
    #[serde(default)]
    document_list: Vec<PortalDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortalDocument {
    #[serde(default)]
    template_name: String,
    template_id: i64,
    #[serde(default)]
    compile_output_type: i64,
}

/// Parsed HTML agenda: items plus page-level participation info.
struct ParsedAgenda {
    participation: Option<ParticipationInfo>,
    items: Vec<FetchedItem>,
}

pub struct PrimeGovAdapter {
    slug: String,
    base_url: String,
    http: HttpSession,
}

impl PrimeGovAdapter {
    pub fn new(slug: &str) -> Result<Self, SyncError> {
        if slug.is_empty() {
            return Err(SyncError::Configuration(
                "city slug required for primegov".to_string(),
            ));
        }
        Ok(PrimeGovAdapter {
            slug: slug.to_string(),
            base_url: format!("https://{}.primegov.com", slug),
            http: HttpSession::new()?,
        })
    }

    fn packet_url(&self, doc: &PortalDocument) -> String {
        format!(
            "{}/Public/CompiledDocument?meetingTemplateId={}&compileOutputType={}",
            self.base_url, doc.template_id, doc.compile_output_type
        )
    }

    async fn fetch_html_agenda(&self, html_url: &str) -> Result<ParsedAgenda, SyncError> {
        let html = self.http.get_text(html_url).await?;
        let mut parsed = parse_html_agenda(&html);

        // Drop procedural items before they ever reach the store
        let before = parsed.items.len();
        parsed.items.retain(|item| !should_skip_item(&item.title, ""));
        let filtered = before - parsed.items.len();
        if filtered > 0 {
            log::info!(
                "[primegov:{}] Filtered {} procedural items",
                self.slug,
                filtered
            );
        }

        // Absolutize attachment URLs and default the type
        for item in &mut parsed.items {
            for att in &mut item.attachments {
                if let Some(url) = &att.url {
                    if url.starts_with('/') {
                        att.url = Some(format!("{}{}", self.base_url, url));
                    }
                }
            }
        }

        Ok(parsed)
    }
}

#[async_trait]
impl VendorAdapter for PrimeGovAdapter {
    fn vendor(&self) -> &'static str {
        "primegov"
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn fetch_meetings(&self, _window: SyncWindow) -> Result<Vec<FetchedMeeting>, SyncError> {
        let api_url = format!("{}/api/v2/PublicPortal/ListUpcomingMeetings", self.base_url);
        let response = self.http.get(&api_url).await?;
        let meetings: Vec<PortalMeeting> =
            response.json().await.map_err(|e| SyncError::BadPayload {
                vendor: "primegov",
                detail: e.to_string(),
            })?;

        log::info!(
            "[primegov:{}] Retrieved {} meetings",
            self.slug,
            meetings.len()
        );

        let mut results = Vec::new();

        for meeting in meetings {
            let title = meeting.title.clone();

            // Spanish simulcast duplicates carry no agenda content
            if title.contains(" - SAP") {
                log::debug!("[primegov:{}] Skipping SAP broadcast: {}", self.slug, title);
                continue;
            }
            if should_skip_meeting(&title) {
                log::debug!("[primegov:{}] Skipping test meeting: {}", self.slug, title);
                continue;
            }

            let status = parse_meeting_status(&title, Some(&meeting.date_time));

            // Prefer the HTML agenda template; packet/agenda PDFs otherwise
            let packet_doc = meeting.document_list.iter().find(|doc| {
                doc.template_name.contains("HTML Agenda")
                    || doc.template_name.to_lowercase().contains("packet")
                    || doc.template_name.to_lowercase().contains("agenda")
            });

            let mut participation = None;
            let source = match packet_doc {
                Some(doc) if doc.template_name.contains("HTML Agenda") => {
                    let html_url = format!(
                        "{}/Portal/Meeting?meetingTemplateId={}",
                        self.base_url, doc.template_id
                    );
                    match self.fetch_html_agenda(&html_url).await {
                        Ok(parsed) if !parsed.items.is_empty() => {
                            log::info!(
                                "[primegov:{}] Found {} items for '{}'",
                                self.slug,
                                parsed.items.len(),
                                title
                            );
                            participation = parsed.participation;
                            AgendaSource::Items {
                                agenda_url: Some(html_url),
                                items: parsed.items,
                            }
                        }
                        Ok(parsed) => {
                            participation = parsed.participation;
                            AgendaSource::None
                        }
                        Err(e) => {
                            log::warn!(
                                "[primegov:{}] Failed to fetch HTML agenda items for {}: {}",
                                self.slug,
                                title,
                                e
                            );
                            AgendaSource::None
                        }
                    }
                }
                Some(doc) => {
                    let packet = self.packet_url(doc);
                    log::info!(
                        "[primegov:{}] Found PDF packet for '{}': {}",
                        self.slug,
                        title,
                        packet
                    );
                    AgendaSource::Packet {
                        packet_url: PacketUrl::Single(packet),
                    }
                }
                None => {
                    log::warn!(
                        "[primegov:{}] No agenda or packet found for: {} ({} docs listed)",
                        self.slug,
                        title,
                        meeting.document_list.len()
                    );
                    AgendaSource::None
                }
            };

            results.push(FetchedMeeting {
                meeting_id: meeting.id.to_string(),
                title,
                start: Some(meeting.date_time),
                status,
                source,
                participation,
                location: None,
            });
        }

        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// HTML agenda parsing (sync, DOM never crosses an await)
// ---------------------------------------------------------------------------

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector parses")
}

fn element_text(element: ElementRef<'_>) -> String {
    let text: Vec<&str> = element.text().collect();
    text.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a Portal/Meeting page into items and participation info.
fn parse_html_agenda(html: &str) -> ParsedAgenda {
    let doc = Html::parse_document(html);

    let page_text: String = doc.root_element().text().collect::<Vec<_>>().join(" ");
    let participation = parse_participation_info(&page_text);

    let items = extract_agenda_items(&doc);

    log::debug!(
        "[primegov] Parsed HTML agenda: {} items, participation: {}",
        items.len(),
        participation.is_some()
    );

    ParsedAgenda {
        participation,
        items,
    }
}

fn extract_agenda_items(doc: &Html) -> Vec<FetchedItem> {
    static MEETING_ITEM: OnceLock<Selector> = OnceLock::new();
    static AGENDA_ITEM: OnceLock<Selector> = OnceLock::new();
    static TABLE_ITEM: OnceLock<Selector> = OnceLock::new();

    let meeting_item = MEETING_ITEM.get_or_init(|| sel("div.meeting-item"));
    let agenda_item = AGENDA_ITEM.get_or_init(|| sel("div.agenda-item"));
    let table_item = TABLE_ITEM.get_or_init(|| sel("table[data-itemid]"));

    // LA pattern: meeting-item wrappers with matter tracking
    let wrappers: Vec<ElementRef> = doc.select(meeting_item).collect();
    if !wrappers.is_empty() {
        return wrappers
            .iter()
            .enumerate()
            .filter_map(|(i, div)| extract_la_item(*div, doc, (i + 1) as i64))
            .collect();
    }

    // Palo Alto pattern: bare agenda-item divs
    let divs: Vec<ElementRef> = doc.select(agenda_item).collect();
    if !divs.is_empty() {
        return divs
            .iter()
            .enumerate()
            .filter_map(|(i, div)| extract_palo_alto_item(*div, doc, (i + 1) as i64))
            .collect();
    }

    // Boulder pattern: tables keyed by data-itemid
    doc.select(table_item)
        .enumerate()
        .filter_map(|(i, table)| extract_boulder_item(table, doc, (i + 1) as i64))
        .collect()
}

fn extract_la_item(wrapper: ElementRef<'_>, doc: &Html, sequence: i64) -> Option<FetchedItem> {
    static INNER: OnceLock<Selector> = OnceLock::new();
    static FORCEPOP: OnceLock<Selector> = OnceLock::new();
    static TR: OnceLock<Selector> = OnceLock::new();
    static TD: OnceLock<Selector> = OnceLock::new();
    static TD_COLSPAN: OnceLock<Selector> = OnceLock::new();
    static NUMBER_CELL: OnceLock<Selector> = OnceLock::new();

    let item_id = wrapper.value().attr("data-itemid")?.to_string();
    let matter_id = wrapper.value().attr("data-mig").map(str::to_string);

    let inner = wrapper
        .select(INNER.get_or_init(|| sel("div.agenda-item")))
        .next()?;

    // Matter metadata lives in the forcepopulate table: first row is the
    // matter file, second row is type + title
    let mut matter_file = None;
    let mut matter_type = None;
    let mut title = None;

    if let Some(table) = inner.select(FORCEPOP.get_or_init(|| sel("table.forcepopulate"))).next() {
        let rows: Vec<ElementRef> = table.select(TR.get_or_init(|| sel("tr"))).collect();
        if let Some(first) = rows.first() {
            if let Some(cell) = first
                .select(TD_COLSPAN.get_or_init(|| sel("td[colspan=\"2\"]")))
                .next()
            {
                let text = element_text(cell);
                if !text.is_empty() {
                    matter_file = Some(text);
                }
            }
        }
        if let Some(second) = rows.get(1) {
            let cells: Vec<ElementRef> = second.select(TD.get_or_init(|| sel("td"))).collect();
            if cells.len() >= 2 {
                let type_text = element_text(cells[0]);
                if !type_text.is_empty() {
                    matter_type = Some(type_text);
                }
                let title_text = element_text(cells[1]);
                if !title_text.is_empty() {
                    title = Some(title_text);
                }
            }
        }
    }

    let title = title.unwrap_or_else(|| element_text(inner));

    // Agenda number from the item-table's number cell
    let agenda_number = wrapper
        .select(NUMBER_CELL.get_or_init(|| sel("table.item-table td.number-cell")))
        .next()
        .map(|cell| element_text(cell).trim_matches(|c| c == '(' || c == ')').to_string())
        .filter(|s| !s.is_empty());

    let attachments = extract_attachments(doc, &item_id);

    Some(FetchedItem {
        vendor_item_id: item_id,
        title,
        sequence,
        attachments,
        matter_id,
        matter_file,
        matter_type,
        agenda_number,
        ..Default::default()
    })
}

fn extract_palo_alto_item(div: ElementRef<'_>, doc: &Html, sequence: i64) -> Option<FetchedItem> {
    let full_id = div.value().attr("id").unwrap_or("");
    if full_id.is_empty() {
        log::warn!("[primegov] agenda item {} has no ID, skipping", sequence);
        return None;
    }
    let item_id = full_id.replace("AgendaItem_", "");

    let title = element_text(div);
    let attachments = extract_attachments(doc, &item_id);

    Some(FetchedItem {
        vendor_item_id: item_id,
        title,
        sequence,
        attachments,
        ..Default::default()
    })
}

fn extract_boulder_item(table: ElementRef<'_>, doc: &Html, sequence: i64) -> Option<FetchedItem> {
    static TD: OnceLock<Selector> = OnceLock::new();

    let item_id = table.value().attr("data-itemid")?.to_string();

    let mut title = None;
    let mut agenda_number = None;

    for cell in table.select(TD.get_or_init(|| sel("td"))) {
        let classes = cell.value().attr("class").unwrap_or("");
        if classes.contains("attachmentCell") || classes.contains("optionalButtonsCell") {
            continue;
        }
        let text = element_text(cell);
        if text.is_empty() {
            continue;
        }

        // Short "A." / "1." cells are the agenda number
        if text.len() <= 3 && (text.ends_with('.') || text.chars().all(|c| c.is_ascii_digit())) {
            agenda_number = Some(text.trim_end_matches('.').to_string());
            continue;
        }
        if title.is_none() {
            title = Some(text);
        }
    }

    let title = title?;
    let attachments = extract_attachments(doc, &item_id);

    Some(FetchedItem {
        vendor_item_id: item_id,
        title,
        sequence,
        attachments,
        agenda_number,
        ..Default::default()
    })
}

/// Attachments live in the `agenda_item_area_{id}` contents div as
/// historyattachment API links.
fn extract_attachments(doc: &Html, item_id: &str) -> Vec<Attachment> {
    static HISTORY_ID: OnceLock<Regex> = OnceLock::new();
    let history_id_re =
        HISTORY_ID.get_or_init(|| Regex::new(r"(?i)historyId=([a-f0-9\-]+)").expect("regex"));

    let Ok(contents_sel) = Selector::parse(&format!("div#agenda_item_area_{}", item_id)) else {
        return Vec::new();
    };
    let Ok(link_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut attachments = Vec::new();
    for contents in doc.select(&contents_sel) {
        for link in contents.select(&link_sel) {
            let href = link.value().attr("href").unwrap_or("");
            if !href.to_lowercase().contains("historyattachment") {
                continue;
            }
            if !history_id_re.is_match(href) {
                continue;
            }

            let mut name = element_text(link);
            if name.is_empty() {
                name = format!("Attachment {}", attachments.len() + 1);
            }

            attachments.push(Attachment {
                name,
                url: Some(href.to_string()),
                kind: AttachmentKind::Pdf,
                content: None,
                start_page: None,
            });
        }
    }
    attachments
}
