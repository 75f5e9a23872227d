//! Menlo-Park-style PDF agenda parser.
//!
//! These agendas use letter-based sections (H. Presentations, J. Consent,
//! K. Regular Business) with items numbered H1., J1., K3., and embed
//! attachment hyperlinks whose filenames begin with the lowercased item id
//! (`j1-20251021-cc-minutes.pdf`), which lets links map to items precisely.

use std::sync::OnceLock;

use regex::Regex;

use crate::parsing::pdf::PdfLink;
use crate::types::{Attachment, AttachmentKind, FetchedItem};

fn item_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^([A-Z]\d+)\.\s*$").expect("regex"))
}

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[A-Z]\.\s*$").expect("regex"))
}

fn staff_report_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(Staff Report #([\d-]+(?:-CC)?)\)").expect("regex"))
}

/// Parse a letter-sectioned PDF agenda into items with mapped attachments.
pub fn parse_letter_sectioned_agenda(pdf_text: &str, links: &[PdfLink]) -> Vec<FetchedItem> {
    let mut items = Vec::new();

    for page_text in pdf_text.split("--- PAGE") {
        let matches: Vec<(usize, usize, String)> = item_id_re()
            .captures_iter(page_text)
            .map(|c| {
                let m = c.get(0).expect("match");
                (m.start(), m.end(), c[1].to_string())
            })
            .collect();

        for (idx, (_, start_pos, item_id)) in matches.iter().enumerate() {
            // Item text runs to the next item or section marker
            let next_item = matches.get(idx + 1).map(|(s, _, _)| *s);
            let next_section = section_re()
                .find_at(page_text, *start_pos)
                .map(|m| m.start());
            let end_pos = match (next_item, next_section) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => page_text.len(),
            };

            let item_text = page_text[*start_pos..end_pos].trim();
            let title = item_text.lines().next().unwrap_or("").trim().to_string();

            // Attachment marker hints what the same-named link is
            let attachment_marker = if item_text.contains("(Attachment)") {
                Some("Attachment".to_string())
            } else if let Some(caps) = staff_report_re().captures(item_text) {
                Some(format!("Staff Report #{}", &caps[1]))
            } else if item_text.contains("(Presentation)") {
                Some("Presentation".to_string())
            } else {
                None
            };

            let sequence = item_id
                .chars()
                .skip(1)
                .collect::<String>()
                .parse::<i64>()
                .unwrap_or(0);

            let attachments =
                find_attachments_for_item(item_id, links, attachment_marker.as_deref());

            items.push(FetchedItem {
                vendor_item_id: item_id.clone(),
                title,
                sequence,
                attachments,
                ..Default::default()
            });
        }
    }

    items
}

/// Map document links to an item by filename prefix. Items without any
/// matching link get zero attachments.
fn find_attachments_for_item(
    item_id: &str,
    all_links: &[PdfLink],
    attachment_marker: Option<&str>,
) -> Vec<Attachment> {
    let item_id_lower = item_id.to_lowercase();
    let prefix = format!("{}-", item_id_lower);
    let mut attachments = Vec::new();

    for link in all_links {
        let url = &link.url;

        // Only actual documents, not navigation or conferencing links
        if !url.contains("/files/sharedassets/") {
            continue;
        }
        if url.starts_with("mailto:") || url.starts_with("https://zoom") {
            continue;
        }

        let filename = url.rsplit('/').next().unwrap_or("").to_lowercase();
        if !filename.starts_with(&prefix) {
            continue;
        }

        let kind = if url.ends_with(".doc") || url.ends_with(".docx") {
            AttachmentKind::Doc
        } else {
            AttachmentKind::Pdf
        };

        let name = match attachment_marker {
            Some(marker) if marker.starts_with("Staff Report") => marker.to_string(),
            Some("Presentation") => format!("{} - Presentation", item_id),
            Some("Attachment") => format!("{} - Attachment", item_id),
            Some(_) => format!("{} - Document", item_id),
            None => {
                // Clean the filename up into a readable name
                let base = filename.trim_end_matches(".pdf").replace('-', " ");
                let mut out = String::with_capacity(base.len());
                let mut cap_next = true;
                for c in base.chars() {
                    if cap_next && c.is_alphabetic() {
                        out.extend(c.to_uppercase());
                        cap_next = false;
                    } else {
                        out.push(c);
                        if c == ' ' {
                            cap_next = true;
                        }
                    }
                }
                out
            }
        };

        attachments.push(Attachment {
            name,
            url: Some(url.clone()),
            kind,
            content: None,
            start_page: None,
        });
    }

    attachments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> &'static str {
        "--- PAGE 3 ---\n\
         J.\n\
         J1.\n\
         Approve the minutes of the October 7 regular meeting (Attachment)\n\
         J2.\n\
         Adopt a resolution accepting the Tour de Menlo proceeds (Staff Report #25-155-CC)\n\
         K.\n\
         K1.\n\
         Consider an ordinance updating the heritage tree standards\n"
    }

    fn sample_links() -> Vec<PdfLink> {
        vec![
            PdfLink {
                page: 3,
                url: "https://menlopark.gov/files/sharedassets/j1-20251021-cc-minutes.pdf".into(),
            },
            PdfLink {
                page: 3,
                url: "https://menlopark.gov/files/sharedassets/j2-20251021-cc-tour-de-menlo.pdf"
                    .into(),
            },
            PdfLink {
                page: 3,
                url: "https://zoom.us/j/5551112222".into(),
            },
        ]
    }

    #[test]
    fn test_letter_numbered_items_extracted() {
        let items = parse_letter_sectioned_agenda(sample_text(), &sample_links());
        let ids: Vec<&str> = items.iter().map(|i| i.vendor_item_id.as_str()).collect();
        assert_eq!(ids, vec!["J1", "J2", "K1"]);
        assert_eq!(items[0].sequence, 1);
        assert_eq!(items[1].sequence, 2);
        assert!(items[0].title.starts_with("Approve the minutes"));
    }

    #[test]
    fn test_links_map_by_filename_prefix() {
        let items = parse_letter_sectioned_agenda(sample_text(), &sample_links());

        assert_eq!(items[0].attachments.len(), 1);
        assert!(items[0].attachments[0]
            .url
            .as_deref()
            .unwrap()
            .contains("j1-"));
        assert_eq!(items[0].attachments[0].name, "J1 - Attachment");

        assert_eq!(items[1].attachments.len(), 1);
        assert_eq!(items[1].attachments[0].name, "Staff Report #25-155-CC");

        // K1 has no matching link and silently gets zero attachments
        assert!(items[2].attachments.is_empty());
    }

    #[test]
    fn test_conferencing_links_excluded() {
        let links = vec![PdfLink {
            page: 3,
            url: "https://zoom.us/j/5551112222".into(),
        }];
        let items = parse_letter_sectioned_agenda(sample_text(), &links);
        assert!(items.iter().all(|i| i.attachments.is_empty()));
    }
}
