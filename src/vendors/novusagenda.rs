//! NovusAgenda adapter - HTML scraping of the /agendapublic row table.
//!
//! Cities using NovusAgenda: Hagerstown MD, Houston TX, and others. Each row
//! carries the date (`MM/DD/YY`), meeting type, and a mix of links. We
//! prefer parsable HTML agendas (HTML/Online Agenda) over generic views and
//! never follow "Agenda Summary" links; the MeetingView page yields items
//! via its CoverSheet links.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::error::SyncError;
use crate::filters::{should_skip_item, should_skip_meeting};
use crate::http::HttpSession;
use crate::types::{AgendaSource, FetchedItem, FetchedMeeting, PacketUrl};
use crate::vendors::{generate_meeting_id, parse_meeting_status, SyncWindow, VendorAdapter};

pub struct NovusAgendaAdapter {
    slug: String,
    base_url: String,
    http: HttpSession,
}

impl NovusAgendaAdapter {
    pub fn new(slug: &str) -> Result<Self, SyncError> {
        if slug.is_empty() {
            return Err(SyncError::Configuration(
                "city slug required for novusagenda".to_string(),
            ));
        }
        Ok(NovusAgendaAdapter {
            slug: slug.to_string(),
            base_url: format!("https://{}.novusagenda.com", slug),
            http: HttpSession::new()?,
        })
    }
}

#[async_trait]
impl VendorAdapter for NovusAgendaAdapter {
    fn vendor(&self) -> &'static str {
        "novusagenda"
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn fetch_meetings(&self, window: SyncWindow) -> Result<Vec<FetchedMeeting>, SyncError> {
        let list_url = format!("{}/agendapublic", self.base_url);
        let html = self.http.get_text(&list_url).await?;

        let rows = parse_listing_rows(&html, &self.base_url);
        log::info!(
            "[novusagenda:{}] Found {} meeting rows",
            self.slug,
            rows.len()
        );

        let today = Utc::now().date_naive();
        let start_date = today - Duration::days(window.days_back);
        let end_date = today + Duration::days(window.days_forward);

        let mut results = Vec::new();

        for row in rows {
            let Some(meeting_date) = NaiveDate::parse_from_str(&row.date_str, "%m/%d/%y").ok()
            else {
                log::warn!(
                    "[novusagenda:{}] Could not parse date '{}' for {}",
                    self.slug,
                    row.date_str,
                    row.meeting_type
                );
                continue;
            };
            if meeting_date < start_date || meeting_date > end_date {
                log::debug!(
                    "[novusagenda:{}] Skipping {} outside date range",
                    self.slug,
                    row.date_str
                );
                continue;
            }
            if should_skip_meeting(&row.meeting_type) {
                continue;
            }

            let status = parse_meeting_status(&row.meeting_type, Some(&row.time_str));

            let meeting_id = row.meeting_id.clone().unwrap_or_else(|| {
                generate_meeting_id(
                    &self.slug,
                    &row.meeting_type,
                    meeting_date.and_hms_opt(0, 0, 0),
                    None,
                )
            });

            // Fetch the HTML agenda for items when one is linked
            let mut items = Vec::new();
            if let Some(agenda_url) = &row.agenda_url {
                log::info!(
                    "[novusagenda:{}] Fetching HTML agenda {}",
                    self.slug,
                    agenda_url
                );
                match self.http.get_text(agenda_url).await {
                    Ok(agenda_html) => {
                        items = parse_meeting_view_items(&agenda_html);
                        let before = items.len();
                        items.retain(|item| !should_skip_item(&item.title, ""));
                        if before > items.len() {
                            log::info!(
                                "[novusagenda:{}] Filtered {} procedural items",
                                self.slug,
                                before - items.len()
                            );
                        }
                        log::info!(
                            "[novusagenda:{}] Extracted {} items from HTML agenda",
                            self.slug,
                            items.len()
                        );
                    }
                    Err(e) => {
                        log::warn!(
                            "[novusagenda:{}] Failed to fetch HTML agenda: {}",
                            self.slug,
                            e
                        );
                    }
                }
            }

            let source = if !items.is_empty() {
                AgendaSource::Items {
                    agenda_url: row.agenda_url.clone(),
                    items,
                }
            } else if let Some(packet) = row.packet_url.clone() {
                AgendaSource::Packet {
                    packet_url: PacketUrl::Single(packet),
                }
            } else {
                log::debug!(
                    "[novusagenda:{}] No packet or agenda found for {} on {}",
                    self.slug,
                    row.meeting_type,
                    row.date_str
                );
                AgendaSource::None
            };

            results.push(FetchedMeeting {
                meeting_id,
                title: row.meeting_type,
                start: Some(format!("{}", meeting_date.format("%Y-%m-%d"))),
                status,
                source,
                participation: None,
                location: None,
            });
        }

        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// HTML parsing (sync, DOM never crosses an await)
// ---------------------------------------------------------------------------

struct ListingRow {
    date_str: String,
    meeting_type: String,
    time_str: String,
    meeting_id: Option<String>,
    packet_url: Option<String>,
    agenda_url: Option<String>,
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

fn meeting_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"MeetingID=(\d+)").expect("regex"))
}

/// Parse the /agendapublic grid rows.
fn parse_listing_rows(html: &str, base_url: &str) -> Vec<ListingRow> {
    static MEETING_VIEW: OnceLock<Regex> = OnceLock::new();
    let meeting_view_re = MEETING_VIEW
        .get_or_init(|| Regex::new(r#"MeetingView\.aspx\?[^'"]+"#).expect("regex"));

    let doc = Html::parse_document(html);
    let row_sel = sel("tr.rgRow, tr.rgAltRow");
    let td_sel = sel("td");
    let link_sel = sel("a");
    let img_sel = sel("img");

    let mut rows = Vec::new();

    for row in doc.select(&row_sel) {
        let cells: Vec<ElementRef> = row.select(&td_sel).collect();
        if cells.len() < 5 {
            continue;
        }

        let date_str = text_of(cells[0]);
        let meeting_type = text_of(cells[1]);
        let time_str = cells.get(3).map(|c| text_of(*c)).unwrap_or_default();

        let mut meeting_id = None;
        let mut packet_url = None;

        // Direct PDF link carries the meeting id
        if let Some(pdf_link) = row.select(&link_sel).find(|a| {
            a.value()
                .attr("href")
                .is_some_and(|h| h.contains("DisplayAgendaPDF.ashx"))
        }) {
            let href = pdf_link.value().attr("href").unwrap_or("");
            if let Some(caps) = meeting_id_re().captures(href) {
                meeting_id = Some(caps[1].to_string());
                packet_url = Some(format!("{}/agendapublic/{}", base_url, href));
            }
        }

        // Score agenda links: parsable HTML agendas beat generic views,
        // summaries are never followed
        let mut best_score = 0;
        let mut best_onclick: Option<String> = None;

        for link in row.select(&link_sel) {
            let Some(onclick) = link.value().attr("onclick") else {
                continue;
            };
            if !onclick.contains("MeetingView.aspx") {
                continue;
            }

            let mut link_text = text_of(link).to_lowercase();
            // Houston uses image-only links; the alt text names the view
            if let Some(img) = link.select(&img_sel).next() {
                if let Some(alt) = img.value().attr("alt") {
                    link_text = format!("{} {}", link_text, alt.to_lowercase())
                        .trim()
                        .to_string();
                }
            }

            let score = if link_text.contains("html agenda") || link_text.contains("online agenda")
            {
                3
            } else if (link_text.contains("view agenda") || link_text.contains("agenda"))
                && !link_text.contains("summary")
            {
                2
            } else {
                0
            };

            if score > best_score {
                best_score = score;
                best_onclick = Some(onclick.to_string());
            }
        }

        let agenda_url = best_onclick.as_deref().and_then(|onclick| {
            meeting_view_re.find(onclick).map(|m| {
                let relative = m.as_str();
                if meeting_id.is_none() {
                    if let Some(caps) = meeting_id_re().captures(relative) {
                        // Fill the id from the agenda link when the PDF
                        // link was absent
                        return (
                            format!("{}/agendapublic/{}", base_url, relative),
                            Some(caps[1].to_string()),
                        );
                    }
                }
                (format!("{}/agendapublic/{}", base_url, relative), None)
            })
        });

        let (agenda_url, id_from_agenda) = match agenda_url {
            Some((url, id)) => (Some(url), id),
            None => (None, None),
        };
        if meeting_id.is_none() {
            meeting_id = id_from_agenda;
        }

        rows.push(ListingRow {
            date_str,
            meeting_type,
            time_str,
            meeting_id,
            packet_url,
            agenda_url,
        });
    }

    rows
}

/// Extract items from a MeetingView page via its CoverSheet links.
fn parse_meeting_view_items(html: &str) -> Vec<FetchedItem> {
    static ITEM_ID: OnceLock<Regex> = OnceLock::new();
    let item_id_re = ITEM_ID.get_or_init(|| Regex::new(r"(?i)ItemID=(\d+)").expect("regex"));

    let doc = Html::parse_document(html);
    let link_sel = sel("a[href]");

    let mut items = Vec::new();
    let mut sequence = 0i64;

    for link in doc.select(&link_sel) {
        let href = link.value().attr("href").unwrap_or("");
        if !href.to_lowercase().contains("coversheet.aspx?itemid=") {
            continue;
        }
        let Some(caps) = item_id_re.captures(href) else {
            continue;
        };

        sequence += 1;
        let item_id = caps[1].to_string();

        // Title from the link text, falling back to the parent cell
        let mut title = text_of(link);
        if title.is_empty() {
            let parent_td = std::iter::successors(link.parent(), |n| n.parent())
                .find_map(|n| ElementRef::wrap(n).filter(|el| el.value().name() == "td"));
            if let Some(td) = parent_td {
                title = text_of(td);
            }
        }

        items.push(FetchedItem {
            vendor_item_id: item_id,
            title,
            sequence,
            attachments: Vec::new(),
            ..Default::default()
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_HTML: &str = r##"
        <table>
        <tr class="rgRow">
            <td>06/03/25</td>
            <td>Mayor and City Council Regular Meeting</td>
            <td></td>
            <td>7:00 PM</td>
            <td>
              <a href="DisplayAgendaPDF.ashx?MeetingID=1482">PDF</a>
              <a onclick="window.open('MeetingView.aspx?MeetingID=1482&MinutesMeetingID=0&doctype=Agenda');" href="#">
                <img alt="HTML Agenda" src="html.gif">
              </a>
              <a onclick="window.open('MeetingView.aspx?MeetingID=1482&doctype=Summary');" href="#">
                <img alt="Agenda Summary" src="summary.gif">
              </a>
            </td>
        </tr>
        <tr class="rgAltRow">
            <td>not-a-date</td>
            <td>Broken Row</td>
            <td></td>
            <td></td>
            <td></td>
        </tr>
        </table>
    "##;

    #[test]
    fn test_listing_rows_parsed() {
        let rows = parse_listing_rows(LISTING_HTML, "https://hagerstown.novusagenda.com");
        assert_eq!(rows.len(), 2);

        let row = &rows[0];
        assert_eq!(row.date_str, "06/03/25");
        assert_eq!(row.meeting_type, "Mayor and City Council Regular Meeting");
        assert_eq!(row.time_str, "7:00 PM");
        assert_eq!(row.meeting_id.as_deref(), Some("1482"));
        assert!(row
            .packet_url
            .as_deref()
            .expect("packet")
            .contains("/agendapublic/DisplayAgendaPDF.ashx?MeetingID=1482"));
    }

    #[test]
    fn test_html_agenda_preferred_over_summary() {
        let rows = parse_listing_rows(LISTING_HTML, "https://hagerstown.novusagenda.com");
        let agenda_url = rows[0].agenda_url.as_deref().expect("agenda url");
        assert!(agenda_url.contains("doctype=Agenda"));
        assert!(!agenda_url.contains("Summary"));
    }

    const MEETING_VIEW_HTML: &str = r#"
        <table>
        <tr><td><a href="CoverSheet.aspx?ItemID=9001&MeetingID=1482">Approval of the water main replacement contract</a></td></tr>
        <tr><td><a href="CoverSheet.aspx?ItemID=9002&MeetingID=1482"></a>Ordinance establishing residential permit parking</td></tr>
        <tr><td><a href="Elsewhere.aspx?ItemID=1">not an item</a></td></tr>
        </table>
    "#;

    #[test]
    fn test_meeting_view_items_via_coversheet_links() {
        let items =
            parse_meeting_view_items(MEETING_VIEW_HTML);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].vendor_item_id, "9001");
        assert!(items[0].title.contains("water main"));
        assert_eq!(items[0].sequence, 1);

        // Empty link text falls back to the parent cell
        assert_eq!(items[1].vendor_item_id, "9002");
        assert!(items[1].title.contains("permit parking"));
    }

    #[test]
    fn test_date_format() {
        assert!(NaiveDate::parse_from_str("06/03/25", "%m/%d/%y").is_ok());
        assert!(NaiveDate::parse_from_str("not-a-date", "%m/%d/%y").is_err());
    }
}
