//! Granicus adapter - static view-id configuration plus HTML scraping.
//!
//! Granicus has no clean public API. Each city's publisher page is keyed by
//! a numeric view_id that must be configured up front in
//! `granicus_view_ids.json`; construction fails fast without it. Only links
//! under the "Upcoming" section are crawled - the rest of ViewPublisher.php
//! is years of historical archives, and when no upcoming section is
//! detectable the adapter yields zero meetings rather than leak history.
//!
//! AgendaViewer pages are usually HTML item tables; some cities serve a PDF
//! from the same URL, in which case text and hyperlinks are parsed to infer
//! items.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};

use crate::error::SyncError;
use crate::filters::{should_skip_item, should_skip_meeting};
use crate::http::HttpSession;
use crate::parsing::chunker;
use crate::types::{
    AgendaSource, Attachment, AttachmentKind, FetchedItem, FetchedMeeting, PacketUrl,
};
use crate::vendors::{absolutize_url, parse_meeting_status, SyncWindow, VendorAdapter};

pub struct GranicusAdapter {
    slug: String,
    base_url: String,
    list_url: String,
    http: HttpSession,
}

impl GranicusAdapter {
    /// Construct with the static view-id configuration. Errors when the
    /// mapping file is absent or doesn't cover this city.
    pub fn new(slug: &str, view_ids_path: &Path) -> Result<Self, SyncError> {
        if slug.is_empty() {
            return Err(SyncError::Configuration(
                "city slug required for granicus".to_string(),
            ));
        }
        let base_url = format!("https://{}.granicus.com", slug);

        let raw = std::fs::read_to_string(view_ids_path).map_err(|_| {
            SyncError::Configuration(format!(
                "Granicus view_id configuration not found: {}",
                view_ids_path.display()
            ))
        })?;
        let mappings: HashMap<String, i64> = serde_json::from_str(&raw).map_err(|e| {
            SyncError::Configuration(format!(
                "invalid JSON in {}: {}",
                view_ids_path.display(),
                e
            ))
        })?;

        let view_id = *mappings.get(&base_url).ok_or_else(|| {
            SyncError::Configuration(format!(
                "view_id not configured for {}. Add mapping to {}",
                base_url,
                view_ids_path.display()
            ))
        })?;

        let list_url = format!("{}/ViewPublisher.php?view_id={}", base_url, view_id);
        log::info!("[granicus:{}] adapter initialized, view_id={}", slug, view_id);

        Ok(GranicusAdapter {
            slug: slug.to_string(),
            base_url,
            list_url,
            http: HttpSession::new()?,
        })
    }

    async fn fetch_agenda_items(&self, agenda_url: &str) -> ParsedAgendaItems {
        let response = match self.http.get(agenda_url).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!(
                    "[granicus:{}] Failed to fetch agenda viewer {}: {}",
                    self.slug,
                    agenda_url,
                    e
                );
                return ParsedAgendaItems::default();
            }
        };

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[granicus:{}] Failed reading agenda body: {}", self.slug, e);
                return ParsedAgendaItems::default();
            }
        };

        let is_pdf = content_type.contains("application/pdf") || bytes.starts_with(b"%PDF");

        if is_pdf {
            log::info!(
                "[granicus:{}] AgendaViewer returned PDF - attempting item extraction",
                self.slug
            );
            return self.parse_pdf_agenda(&bytes);
        }

        let html = String::from_utf8_lossy(&bytes).to_string();
        let mut items = parse_agenda_viewer_html(&html);

        let before = items.len();
        items.retain(|item| !should_skip_item(&item.title, ""));
        if before > items.len() {
            log::info!(
                "[granicus:{}] Filtered {} procedural items",
                self.slug,
                before - items.len()
            );
        }

        for item in &mut items {
            for att in &mut item.attachments {
                if let Some(url) = &att.url {
                    if !url.starts_with("http") {
                        att.url = Some(absolutize_url(&self.base_url, url));
                    }
                }
            }
        }

        ParsedAgendaItems { items }
    }

    /// Item inference for cities whose AgendaViewer serves the agenda as a
    /// PDF: extract text, run the structural chunker, carry the chunk text
    /// as text-segment attachments.
    fn parse_pdf_agenda(&self, bytes: &[u8]) -> ParsedAgendaItems {
        let extracted = match crate::parsing::pdf::extract_from_bytes(bytes, true) {
            Ok(extracted) => extracted,
            Err(e) => {
                log::warn!("[granicus:{}] PDF extraction failed: {}", self.slug, e);
                return ParsedAgendaItems::default();
            }
        };

        let mut detected = chunker::chunk_by_structure(&extracted.text);
        if detected.is_empty() {
            detected = chunker::chunk_by_patterns(&extracted.text);
        }

        if detected.is_empty() {
            log::warn!(
                "[granicus:{}] PDF extraction succeeded but no items found",
                self.slug
            );
            return ParsedAgendaItems::default();
        }

        log::info!(
            "[granicus:{}] Extracted {} items from PDF",
            self.slug,
            detected.len()
        );

        let items = detected
            .into_iter()
            .map(|chunk| FetchedItem {
                vendor_item_id: format!("pdf_{}", chunk.sequence),
                title: chunk.title,
                sequence: chunk.sequence,
                attachments: vec![Attachment::text_segment(
                    truncate_chars(&chunk.text, 5000),
                    chunk.start_page,
                )],
                ..Default::default()
            })
            .collect();

        ParsedAgendaItems { items }
    }

    /// AgendaViewer with no items sometimes redirects to DocumentViewer
    /// carrying the real PDF URL in its query string.
    async fn resolve_packet_from_viewer(&self, agenda_url: &str) -> Option<String> {
        let response = self.http.head(agenda_url).await.ok()?;
        let final_url = response.url().clone();
        if !final_url.as_str().contains("DocumentViewer.php") {
            return None;
        }
        final_url
            .query_pairs()
            .find(|(k, _)| k == "url")
            .map(|(_, v)| v.to_string())
    }
}

#[derive(Default)]
struct ParsedAgendaItems {
    items: Vec<FetchedItem>,
}

#[async_trait]
impl VendorAdapter for GranicusAdapter {
    fn vendor(&self) -> &'static str {
        "granicus"
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn fetch_meetings(&self, _window: SyncWindow) -> Result<Vec<FetchedMeeting>, SyncError> {
        let html = self.http.get_text(&self.list_url).await?;
        let links = parse_upcoming_links(&html, &self.base_url);

        if links.is_empty() {
            log::warn!(
                "[granicus:{}] No agenda links found in upcoming section",
                self.slug
            );
            return Ok(Vec::new());
        }

        log::info!(
            "[granicus:{}] Found {} upcoming agenda links",
            self.slug,
            links.len()
        );

        let mut seen_ids = std::collections::HashSet::new();
        let mut results = Vec::new();

        for link in links {
            let meeting_id = extract_meeting_id(&link.url);
            if let Some(ref id) = meeting_id {
                if !seen_ids.insert(id.clone()) {
                    continue;
                }
            }

            let title = link.title.clone();
            if should_skip_meeting(&title) {
                continue;
            }

            let meeting_id = meeting_id.unwrap_or_else(|| {
                let id_string = format!("{}_{}_{}", title, link.start, link.url);
                let digest = Sha256::digest(id_string.as_bytes());
                hex::encode(&digest[..4])
            });

            let status = parse_meeting_status(&title, Some(&link.start));

            let source = if link.url.contains("AgendaViewer.php") {
                let parsed = self.fetch_agenda_items(&link.url).await;
                if !parsed.items.is_empty() {
                    log::info!(
                        "[granicus:{}] Meeting '{}' has {} items",
                        self.slug,
                        truncate_chars(&title, 40),
                        parsed.items.len()
                    );
                    AgendaSource::Items {
                        agenda_url: Some(link.url.clone()),
                        items: parsed.items,
                    }
                } else if let Some(pdf_url) = self.resolve_packet_from_viewer(&link.url).await {
                    AgendaSource::Packet {
                        packet_url: PacketUrl::Single(pdf_url),
                    }
                } else {
                    AgendaSource::None
                }
            } else if link.url.to_lowercase().contains(".pdf")
                || link.url.contains("GeneratedAgenda")
            {
                AgendaSource::Packet {
                    packet_url: PacketUrl::Single(link.url.clone()),
                }
            } else {
                AgendaSource::None
            };

            results.push(FetchedMeeting {
                meeting_id,
                title,
                start: Some(link.start),
                status,
                source,
                participation: None,
                location: None,
            });
        }

        Ok(results)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn extract_meeting_id(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let pairs: HashMap<String, String> = parsed
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    pairs
        .get("clip_id")
        .or_else(|| pairs.get("event_id"))
        .cloned()
}

// ---------------------------------------------------------------------------
// HTML parsing (sync, DOM never crosses an await)
// ---------------------------------------------------------------------------

struct UpcomingLink {
    url: String,
    title: String,
    start: String,
}

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector parses")
}

/// Element text, skipping hidden `display:none` spans Granicus uses for
/// sort keys.
fn visible_text(el: ElementRef<'_>) -> String {
    fn walk(el: ElementRef<'_>, out: &mut Vec<String>) {
        for child in el.children() {
            match child.value() {
                scraper::Node::Text(text) => {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        out.push(trimmed.to_string());
                    }
                }
                scraper::Node::Element(element) => {
                    let hidden = element
                        .attr("style")
                        .is_some_and(|s| s.replace(' ', "").contains("display:none"));
                    if !hidden {
                        if let Some(child_ref) = ElementRef::wrap(child) {
                            walk(child_ref, out);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut parts = Vec::new();
    walk(el, &mut parts);
    parts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

const MONTHS: &[&str] = &[
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Find the "Upcoming" section and collect agenda links scoped to it.
/// Returns an empty list when no upcoming section is detectable.
fn parse_upcoming_links(html: &str, base_url: &str) -> Vec<UpcomingLink> {
    let doc = Html::parse_document(html);

    let scope = find_upcoming_scope(&doc);
    let Some(scope) = scope else {
        let div_ids: Vec<String> = doc
            .select(&sel("div[id]"))
            .take(10)
            .filter_map(|d| d.value().attr("id").map(str::to_string))
            .collect();
        log::warn!(
            "[granicus] No 'Upcoming' section found (tried div#upcoming, headings, table headers). \
             Returning 0 meetings to avoid processing historical data. Found div IDs: {:?}",
            div_ids
        );
        return Vec::new();
    };

    static LINK: OnceLock<Selector> = OnceLock::new();
    static TD: OnceLock<Selector> = OnceLock::new();
    let link_sel = LINK.get_or_init(|| sel("a[href]"));
    let td_sel = TD.get_or_init(|| sel("td"));

    let mut links = Vec::new();

    for link in scope.select(link_sel) {
        let href = link.value().attr("href").unwrap_or("");
        let link_text = visible_text(link);

        let is_agenda_link = href.contains("AgendaViewer.php")
            || ((link_text.contains("Agenda") || link_text.contains("Meeting"))
                && (href.to_lowercase().contains(".pdf") || href.contains("GeneratedAgenda")));
        if !is_agenda_link {
            continue;
        }

        let full_url = absolutize_url(base_url, href);

        // Title and date come from the surrounding table row when present
        let mut title = link_text.clone();
        let mut start = "TBD".to_string();

        let parent_row = std::iter::successors(link.parent(), |n| n.parent())
            .find_map(|node| {
                ElementRef::wrap(node).filter(|el| el.value().name() == "tr")
            });

        if let Some(row) = parent_row {
            for cell in row.select(td_sel) {
                let cell_text = visible_text(cell);
                if cell_text.is_empty() {
                    continue;
                }
                let has_month = MONTHS.iter().any(|m| cell_text.contains(m));
                let has_time = cell_text.contains(':')
                    && cell_text.chars().any(|c| c.is_ascii_digit());
                if has_month || has_time {
                    start = cell_text;
                } else if (title.is_empty() || title == link_text)
                    && cell_text != link_text
                    && cell_text.len() > 5
                {
                    title = cell_text;
                }
            }
        }

        links.push(UpcomingLink {
            url: full_url,
            title,
            start,
        });
    }

    links
}

/// Locate the upcoming section: div#upcoming, a heading containing
/// "upcoming" (preferring its sibling table), or a listHeader table cell.
fn find_upcoming_scope(doc: &Html) -> Option<ElementRef<'_>> {
    if let Some(div) = doc.select(&sel("div#upcoming")).next() {
        return Some(div);
    }

    for tag in ["h1", "h2", "h3", "h4", "h5"] {
        let heading = doc
            .select(&sel(tag))
            .find(|h| visible_text(*h).to_lowercase().contains("upcoming"));
        if let Some(heading) = heading {
            // Prefer the next sibling table (most specific scope)
            let sibling_table = heading
                .next_siblings()
                .find_map(|n| ElementRef::wrap(n).filter(|el| el.value().name() == "table"));
            if let Some(table) = sibling_table {
                log::info!("[granicus] found upcoming section via {} sibling table", tag);
                return Some(table);
            }
            let parent_div = std::iter::successors(heading.parent(), |n| n.parent())
                .find_map(|n| ElementRef::wrap(n).filter(|el| el.value().name() == "div"));
            if parent_div.is_some() {
                log::info!("[granicus] found upcoming section via {} parent div", tag);
                return parent_div;
            }
        }
    }

    let header_cell = doc
        .select(&sel("td.listHeader"))
        .find(|td| visible_text(*td).to_lowercase().contains("upcoming"));
    if let Some(cell) = header_cell {
        let table = std::iter::successors(cell.parent(), |n| n.parent())
            .find_map(|n| ElementRef::wrap(n).filter(|el| el.value().name() == "table"));
        if table.is_some() {
            log::info!("[granicus] found upcoming section via table header");
            return table;
        }
    }

    None
}

/// Parse an AgendaViewer HTML page: items sit in collapsed-border tables
/// with a number cell and a title cell carrying "File ID:", attachments as
/// MetaViewer links in the following blockquote.
fn parse_agenda_viewer_html(html: &str) -> Vec<FetchedItem> {
    static META_ID: OnceLock<Regex> = OnceLock::new();
    let meta_id_re = META_ID.get_or_init(|| Regex::new(r"meta_id=(\d+)").expect("regex"));

    let doc = Html::parse_document(html);
    let table_sel = sel("table");
    let tr_sel = sel("tr");
    let td_sel = sel("td");
    let meta_link_sel = sel("a[href]");

    let mut items = Vec::new();

    for table in doc.select(&table_sel) {
        let style = table.value().attr("style").unwrap_or("");
        if !style.to_uppercase().contains("BORDER-COLLAPSE") {
            continue;
        }

        let Some(first_row) = table.select(&tr_sel).next() else {
            continue;
        };
        let cells: Vec<ElementRef> = first_row.select(&td_sel).collect();
        if cells.len() < 2 {
            continue;
        }

        let number_text = visible_text(cells[0]);
        let digits = number_text.replace('.', "");
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let sequence: i64 = digits.parse().unwrap_or(0);

        let title_full = visible_text(cells[1]);
        let (title, item_id) = match title_full.split_once("File ID:") {
            Some((t, id)) => (t.trim().to_string(), id.trim().to_string()),
            None => (title_full.clone(), sequence.to_string()),
        };

        // Attachments live in the blockquote following this table's parent
        let mut attachments = Vec::new();
        let parent_div = std::iter::successors(table.parent(), |n| n.parent())
            .find_map(|n| ElementRef::wrap(n).filter(|el| el.value().name() == "div"));
        if let Some(parent) = parent_div {
            let blockquote = parent
                .next_siblings()
                .find_map(|n| ElementRef::wrap(n).filter(|el| el.value().name() == "blockquote"));
            if let Some(blockquote) = blockquote {
                for link in blockquote.select(&meta_link_sel) {
                    let href = link.value().attr("href").unwrap_or("");
                    if !href.contains("MetaViewer") {
                        continue;
                    }
                    let name = {
                        let text = visible_text(link);
                        if text.is_empty() {
                            format!("Attachment {}", sequence)
                        } else {
                            text
                        }
                    };
                    let _meta_id = meta_id_re
                        .captures(href)
                        .map(|c| c[1].to_string());
                    attachments.push(Attachment {
                        name,
                        url: Some(href.to_string()),
                        kind: AttachmentKind::Pdf,
                        content: None,
                        start_page: None,
                    });
                }
            }
        }

        items.push(FetchedItem {
            vendor_item_id: item_id,
            title,
            sequence,
            attachments,
            ..Default::default()
        });
    }

    items
}
