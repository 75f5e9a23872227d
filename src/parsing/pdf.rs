//! PDF text extraction and quality judgement.
//!
//! `pdf-extract` can panic on malformed files, so extraction is wrapped in
//! `catch_unwind`. Page boundaries are preserved as `--- PAGE N ---` markers,
//! which the chunkers use to attribute items to pages. Hyperlink annotations
//! are walked separately with `lopdf` for the parsers that map links to
//! items (Granicus PDF agendas, Menlo Park).

use crate::error::ExtractError;

/// A hyperlink annotation lifted from a PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfLink {
    /// 1-based page number the annotation sits on.
    pub page: u32,
    pub url: String,
}

/// Result of extracting a PDF.
#[derive(Debug)]
pub struct ExtractedPdf {
    /// Full text with `--- PAGE N ---` markers between pages.
    pub text: String,
    pub page_count: u32,
    pub links: Vec<PdfLink>,
}

/// Extract text (and optionally hyperlinks) from PDF bytes.
pub fn extract_from_bytes(bytes: &[u8], extract_links: bool) -> Result<ExtractedPdf, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::Empty);
    }

    let owned = bytes.to_vec();
    let pages = std::panic::catch_unwind(move || pdf_extract::extract_text_from_mem_by_pages(&owned))
        .map_err(|_| ExtractError::Panicked)?
        .map_err(|e| ExtractError::ExtractionFailed(e.to_string()))?;

    if pages.is_empty() {
        return Err(ExtractError::Empty);
    }

    let page_count = pages.len() as u32;
    let mut text = String::new();
    for (idx, page) in pages.iter().enumerate() {
        if idx > 0 {
            text.push('\n');
        }
        text.push_str(&format!("--- PAGE {} ---\n", idx + 1));
        text.push_str(page.trim_end());
        text.push('\n');
    }

    let links = if extract_links {
        extract_link_annotations(bytes).unwrap_or_else(|e| {
            log::debug!("link extraction failed (non-fatal): {}", e);
            Vec::new()
        })
    } else {
        Vec::new()
    };

    Ok(ExtractedPdf {
        text,
        page_count,
        links,
    })
}

/// Walk page /Annots arrays for /Link annotations carrying /URI actions.
fn extract_link_annotations(bytes: &[u8]) -> Result<Vec<PdfLink>, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ExtractError::ExtractionFailed(format!("lopdf: {}", e)))?;

    let mut links = Vec::new();

    for (page_no, page_id) in doc.get_pages() {
        let Ok(page) = doc.get_dictionary(page_id) else {
            continue;
        };
        let Ok(annots) = page.get(b"Annots") else {
            continue;
        };

        let Some(annots) = resolve(&doc, annots).and_then(|o| o.as_array().ok()) else {
            continue;
        };

        for annot in annots {
            let Some(dict) = resolve(&doc, annot).and_then(|o| o.as_dict().ok()) else {
                continue;
            };
            let Some(action) = dict
                .get(b"A")
                .ok()
                .and_then(|a| resolve(&doc, a))
                .and_then(|o| o.as_dict().ok())
            else {
                continue;
            };
            let uri = match action.get(b"URI").ok().and_then(|u| resolve(&doc, u)) {
                Some(lopdf::Object::String(bytes, _)) => {
                    String::from_utf8_lossy(bytes).to_string()
                }
                _ => continue,
            };

            links.push(PdfLink { page: page_no, url: uri });
        }
    }

    Ok(links)
}

fn resolve<'a>(doc: &'a lopdf::Document, obj: &'a lopdf::Object) -> Option<&'a lopdf::Object> {
    match obj {
        lopdf::Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

// ---------------------------------------------------------------------------
// Quality judgement
// ---------------------------------------------------------------------------

/// Vocabulary expected in real agenda text. Fewer than three hits means the
/// extraction produced noise rather than content.
const COMMON_MEETING_WORDS: &[&str] = &[
    "meeting", "agenda", "council", "item", "public", "board", "city", "approval", "discussion",
    "report", "minutes", "call", "the", "and", "to", "of", "for", "in", "on", "at",
];

/// Check whether digital extraction produced meaningful text.
///
/// Rejects: short output, low letter ratio, mostly-numeric token streams,
/// fragmented single-word lines, missing word structure, and text with no
/// civic vocabulary.
pub fn is_good_extraction(text: &str) -> Result<(), ExtractError> {
    let text = text.trim();

    if text.len() < 50 {
        return Err(ExtractError::PoorQuality(format!(
            "only {} chars extracted",
            text.len()
        )));
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    let letter_ratio = letters as f64 / text.len() as f64;
    if letter_ratio < 0.3 {
        return Err(ExtractError::PoorQuality(format!(
            "letter ratio {:.2} below 0.30",
            letter_ratio
        )));
    }

    let valid_lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if valid_lines.is_empty() {
        return Err(ExtractError::PoorQuality("no non-empty lines".to_string()));
    }

    let all_text = valid_lines.join(" ");
    let words: Vec<&str> = all_text.split_whitespace().collect();

    // Mostly page numbers / tabular digits
    if words.len() > 5 {
        let number_words = words
            .iter()
            .filter(|w| w.chars().all(|c| c.is_ascii_digit()))
            .count();
        if number_words as f64 / words.len() as f64 > 0.5 {
            return Err(ExtractError::PoorQuality(format!(
                "mostly numeric: {}/{} tokens",
                number_words,
                words.len()
            )));
        }
    }

    // Fragmented extraction shows up as columns of single words
    if valid_lines.len() > 10 {
        let single_word_lines = valid_lines
            .iter()
            .filter(|l| l.split_whitespace().count() == 1)
            .count();
        if single_word_lines as f64 / valid_lines.len() as f64 > 0.5 {
            return Err(ExtractError::PoorQuality(format!(
                "fragmented: {}/{} single-word lines",
                single_word_lines,
                valid_lines.len()
            )));
        }
    }

    // Sample should contain longer words, not just initials and digits
    let sample: Vec<&str> = valid_lines
        .iter()
        .take(10)
        .flat_map(|l| l.split_whitespace())
        .collect();
    if sample.len() > 10 {
        let long_words = sample
            .iter()
            .filter(|w| w.len() > 3 && !w.chars().all(|c| c.is_ascii_digit()))
            .count();
        if (long_words as f64 / sample.len() as f64) < 0.3 {
            return Err(ExtractError::PoorQuality(
                "sample lacks word structure".to_string(),
            ));
        }
    }

    let text_lower = all_text.to_lowercase();
    let found = COMMON_MEETING_WORDS
        .iter()
        .filter(|w| text_lower.contains(*w))
        .count();
    if found < 3 {
        return Err(ExtractError::PoorQuality(format!(
            "lacks common meeting words (found {})",
            found
        )));
    }

    Ok(())
}

/// Estimate pages from character count (~2000 chars per page).
pub fn estimate_page_count(text: &str) -> u32 {
    std::cmp::max(1, (text.len() / 2000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agenda_sample() -> String {
        let mut text = String::from(
            "CITY COUNCIL REGULAR MEETING AGENDA\n\
             Call to order and roll call of members present.\n",
        );
        for i in 1..20 {
            text.push_str(&format!(
                "{}. Discussion and approval of the public works report for district {}.\n",
                i, i
            ));
        }
        text
    }

    #[test]
    fn test_good_agenda_text_passes() {
        assert!(is_good_extraction(&agenda_sample()).is_ok());
    }

    #[test]
    fn test_short_text_rejected() {
        let err = is_good_extraction("agenda").unwrap_err();
        assert!(matches!(err, ExtractError::PoorQuality(_)));
    }

    #[test]
    fn test_low_letter_ratio_rejected() {
        let text = "1234567890 ".repeat(30);
        assert!(is_good_extraction(&text).is_err());
    }

    #[test]
    fn test_mostly_numbers_rejected() {
        let text = "12 34 56 78 90 11 22 33 44 55 meeting agenda council ok 66 77 88 99 101 \
                    202 303 404 505 606 707 808 909 111 222 333 444 555";
        assert!(is_good_extraction(text).is_err());
    }

    #[test]
    fn test_fragmented_single_word_lines_rejected() {
        let text = (0..40)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(is_good_extraction(&text).is_err());
    }

    #[test]
    fn test_missing_civic_vocabulary_rejected() {
        let text = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod \
                    tempor incididunt ut labore et dolore magna aliqua ut enim ad minim veniam"
            .replace(' ', " xx ");
        assert!(is_good_extraction(&text).is_err());
    }

    #[test]
    fn test_estimate_page_count() {
        assert_eq!(estimate_page_count(""), 1);
        assert_eq!(estimate_page_count(&"x".repeat(1999)), 1);
        assert_eq!(estimate_page_count(&"x".repeat(4000)), 2);
        assert_eq!(estimate_page_count(&"x".repeat(100_000)), 50);
    }

    #[test]
    fn test_empty_bytes_rejected() {
        assert!(matches!(
            extract_from_bytes(&[], false),
            Err(ExtractError::Empty)
        ));
    }
}
