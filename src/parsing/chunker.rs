//! Agenda document chunker.
//!
//! Carves a monolithic packet into per-item chunks using two complementary
//! strategies. The cover-based parser treats the dense agenda listing at the
//! front of the packet as the source of truth for item metadata, then finds
//! where each item's content begins in the body. The pattern-based parser is
//! the fallback: it matches item markers in the first portion of the
//! document and looks for the same references in the remainder.
//!
//! Sanity constraints: fewer than 2 or more than 50 chunks, or one chunk
//! spanning the whole document, means the packet has no usable item
//! structure and is processed monolithically instead.

use std::sync::OnceLock;

use regex::Regex;

/// One item carved out of a packet.
#[derive(Debug, Clone)]
pub struct DetectedItem {
    /// 1-based position in the chunked output.
    pub sequence: i64,
    pub title: String,
    pub text: String,
    pub start_page: Option<u32>,
}

/// Item metadata parsed from the cover listing.
#[derive(Debug, Clone)]
struct CoverItem {
    item_id: String,
    item_number: u32,
    title: String,
}

/// Boundary where a cover item was located in the body.
#[derive(Debug)]
struct Boundary {
    start: usize,
    item_id: String,
    title: String,
}

const MAX_CHUNKS: usize = 50;

/// Clamp a byte offset down to the nearest char boundary so computed
/// positions never split a multibyte character.
fn clamp_boundary(s: &str, idx: usize) -> usize {
    let mut idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn page_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"--- PAGE (\d+) ---").expect("regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("regex"))
}

/// Escape a literal title for searching with flexible whitespace, so line
/// wraps in the body don't defeat the match.
fn flexible_title_pattern(title: &str) -> String {
    let escaped = regex::escape(title);
    escaped.replace(' ', r"\s+")
}

fn find_start_page(content: &str) -> Option<u32> {
    let window = truncate_chars(content, 5000);
    page_marker_re()
        .captures(window)
        .and_then(|c| c[1].parse().ok())
}

// ---------------------------------------------------------------------------
// Cover-based strategy
// ---------------------------------------------------------------------------

/// Universal agenda parser. Extracts the cover listing, locates each item in
/// the body, and splits on those boundaries. Returns an empty vec when the
/// structure isn't usable.
pub fn chunk_by_structure(pdf_text: &str) -> Vec<DetectedItem> {
    static FORM_FEED: OnceLock<Regex> = OnceLock::new();
    static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
    let form_feed = FORM_FEED.get_or_init(|| Regex::new(r"\f+").expect("regex"));
    let blank_runs = BLANK_RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("regex"));

    let text = form_feed.replace_all(pdf_text, "\n\n");
    let text = blank_runs.replace_all(&text, "\n\n");
    let text = text.as_ref();

    if text.is_empty() {
        return Vec::new();
    }

    let cover_end = detect_cover_end(text);
    let cover_text = &text[..cover_end];
    let body_text = &text[cover_end..];

    log::info!(
        "[Chunker] Cover ends at {} ({:.1}% of doc)",
        cover_end,
        cover_end as f64 / text.len() as f64 * 100.0
    );

    let agenda_items = parse_cover_agenda(cover_text);
    if agenda_items.is_empty() {
        log::info!("[Chunker] No agenda items found in cover");
        return Vec::new();
    }

    // A tiny cover with almost no items is likely a false detection
    let cover_pct = cover_end as f64 / text.len() as f64;
    if cover_pct < 0.005 && agenda_items.len() < 3 {
        log::info!(
            "[Chunker] Cover too small ({:.1}%) with only {} items - likely false detection",
            cover_pct * 100.0,
            agenda_items.len()
        );
        return Vec::new();
    }

    log::info!(
        "[Chunker] Found {} items in cover section",
        agenda_items.len()
    );

    let boundaries = find_item_boundaries_by_title(body_text, &agenda_items);
    if boundaries.len() < 2 {
        log::info!(
            "[Chunker] Insufficient boundaries found by title search (found {})",
            boundaries.len()
        );
        return Vec::new();
    }

    let mut chunks = Vec::new();
    for (i, boundary) in boundaries.iter().enumerate() {
        let start = boundary.start;
        let end = boundaries
            .get(i + 1)
            .map(|b| b.start)
            .unwrap_or(body_text.len());

        let content = body_text[start..end].trim();
        if content.len() < 100 {
            log::debug!(
                "[Chunker] Item {} has minimal content ({} chars)",
                boundary.item_id,
                content.len()
            );
        }

        chunks.push(DetectedItem {
            sequence: (i + 1) as i64,
            title: format!("{}. {}", boundary.item_id, boundary.title),
            text: content.to_string(),
            start_page: find_start_page(content),
        });
    }

    log::info!(
        "[Chunker] Created {} chunks from {} cover items",
        chunks.len(),
        agenda_items.len()
    );

    if chunks.len() < 2 || chunks.len() > MAX_CHUNKS {
        return Vec::new();
    }
    chunks
}

/// Find where the cover page ends and item content begins. Signals: first
/// occurrence of a report header on its own line, else a drop in newline
/// density (the agenda listing is dense, report bodies are not).
fn detect_cover_end(text: &str) -> usize {
    static HEADERS: OnceLock<Vec<Regex>> = OnceLock::new();
    let headers = HEADERS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)\n\s*REPORT TO THE").expect("regex"),
            Regex::new(r"(?i)\n\s*Item \d+\s*\n\s*Staff Report").expect("regex"),
            Regex::new(r"(?i)\n\s*STAFF REPORT\s*\n").expect("regex"),
            Regex::new(r"(?i)\n\s*ACTION ITEM\s*\n").expect("regex"),
        ]
    });

    let mut earliest = text.len();
    for re in headers.iter() {
        if let Some(m) = re.find(text) {
            if m.start() < earliest {
                earliest = m.start();
            }
        }
    }

    if earliest < text.len() {
        return earliest;
    }

    // Density analysis over the first 20K chars in 2000-char windows
    log::debug!("[Chunker] No report headers found, using density analysis");
    let limit = clamp_boundary(text, text.len().min(20_000));
    let windows: Vec<&str> = (0..limit)
        .step_by(2000)
        .map(|i| &text[clamp_boundary(text, i)..clamp_boundary(text, (i + 2000).min(limit))])
        .collect();

    for i in 1..windows.len() {
        let density = |chunk: &str| {
            if chunk.is_empty() {
                return 0.0;
            }
            chunk.matches('\n').count() as f64 / (chunk.len() as f64 / 100.0)
        };
        if density(windows[i]) < density(windows[i - 1]) * 0.6 {
            return clamp_boundary(text, i * 2000);
        }
    }

    clamp_boundary(text, (text.len() as f64 * 0.15) as usize)
}

/// Extract the agenda item listing from the cover. Handles both same-line
/// ("4. Title here – 45 minutes") and multiline ("4.\n    Title here")
/// layouts.
fn parse_cover_agenda(cover_text: &str) -> Vec<CoverItem> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    static DURATION: OnceLock<Regex> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"\n\s*(\d+)\.\s*\n\s*([A-Z][^\n]{10,200})").expect("regex"),
            Regex::new(r"\n\s*(\d+)\.\s+([A-Z][^\n]{10,200})").expect("regex"),
        ]
    });
    let duration_re =
        DURATION.get_or_init(|| Regex::new(r"(?i)[–—-]\s*(\d+)\s*minutes?").expect("regex"));

    let padded = format!("\n{}", cover_text);
    let mut items = Vec::new();

    for pattern in patterns.iter() {
        for caps in pattern.captures_iter(&padded) {
            let Ok(num) = caps[1].parse::<u32>() else {
                continue;
            };
            let mut title = caps[2].trim().to_string();

            // Strip trailing duration annotation
            if let Some(m) = duration_re.find(&title) {
                title = title[..m.start()].trim().to_string();
            }

            if title.len() < 10
                || matches!(
                    title.to_uppercase().as_str(),
                    "MINUTES" | "AGENDA" | "MEETING" | "REPORTS"
                )
            {
                continue;
            }

            let title = whitespace_re().replace_all(&title, " ").to_string();

            items.push(CoverItem {
                item_id: num.to_string(),
                item_number: num,
                title: truncate_chars(&title, 150).to_string(),
            });
        }
    }

    // Dedupe by item_id, prefer first occurrence, sort by number
    let mut seen = std::collections::HashSet::new();
    let mut deduped: Vec<CoverItem> = items
        .into_iter()
        .filter(|item| seen.insert(item.item_id.clone()))
        .collect();
    deduped.sort_by_key(|item| item.item_number);
    deduped
}

/// Locate each cover item in the body. Four strategies per item, first hit
/// wins: exact title (flexible whitespace), first-40-chars, `Item N` footer,
/// staff-report header with the item id nearby.
fn find_item_boundaries_by_title(body_text: &str, agenda_items: &[CoverItem]) -> Vec<Boundary> {
    let mut boundaries = Vec::new();

    for item in agenda_items {
        let title = &item.title;
        let mut found = None;

        // Strategy 1: exact title match
        let pattern = format!("(?i){}", flexible_title_pattern(truncate_chars(title, 80)));
        if let Ok(re) = Regex::new(&pattern) {
            if let Some(m) = re.find(body_text) {
                found = Some((m.start(), "exact_title"));
            }
        }

        // Strategy 2: shorter title match
        if found.is_none() && title.chars().count() > 40 {
            let pattern = format!("(?i){}", flexible_title_pattern(truncate_chars(title, 40)));
            if let Ok(re) = Regex::new(&pattern) {
                if let Some(m) = re.find(body_text) {
                    found = Some((m.start(), "short_title"));
                }
            }
        }

        // Strategy 3: "Item N" footer pattern
        if found.is_none() {
            let pattern = format!(r"(?i)Item\s+{}[\s:]", regex::escape(&item.item_id));
            if let Ok(re) = Regex::new(&pattern) {
                if let Some(m) = re.find(body_text) {
                    found = Some((m.start(), "footer_item"));
                }
            }
        }

        // Strategy 4: staff report header with item id nearby
        if found.is_none() {
            let pattern = format!(
                r"(?is)(?:Staff Report).{{0,200}}?(?:Item\s+{id}|Report\s+#.*{id})",
                id = regex::escape(&item.item_id)
            );
            if let Ok(re) = Regex::new(&pattern) {
                if let Some(m) = re.find(body_text) {
                    found = Some((m.start(), "staff_report"));
                }
            }
        }

        match found {
            Some((start, match_type)) => {
                log::debug!(
                    "[Chunker] Found item {} by {} at position {}",
                    item.item_id,
                    match_type,
                    start
                );
                boundaries.push(Boundary {
                    start,
                    item_id: item.item_id.clone(),
                    title: title.clone(),
                });
            }
            None => {
                log::warn!(
                    "[Chunker] Could not find item {} '{}' in body text",
                    item.item_id,
                    truncate_chars(title, 50)
                );
            }
        }
    }

    boundaries.sort_by_key(|b| b.start);
    log::info!(
        "[Chunker] Found {}/{} items in body",
        boundaries.len(),
        agenda_items.len()
    );
    boundaries
}

// ---------------------------------------------------------------------------
// Pattern-based fallback strategy
// ---------------------------------------------------------------------------

struct PatternItem {
    number: String,
    title: String,
}

fn agenda_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)\n\s*(\d+)\.\s*\n\s*([A-Z][^\n]{10,200})").expect("regex"),
            Regex::new(r"(?i)\n\s*(\d+)\.\s+([A-Z][^\n]{10,200})").expect("regex"),
            Regex::new(r"(?i)\n\s*([A-Z])\.\s*\n\s*([A-Z][^\n]{10,200})").expect("regex"),
            Regex::new(r"(?i)\n\s*([A-Z])\.\s+([A-Z][^\n]{10,200})").expect("regex"),
            Regex::new(r"(?i)\n\s*(Item\s+\d+)[:\s]+([^\n]{10,200})").expect("regex"),
        ]
    })
}

/// Fallback two-pass chunker: find item markers in the agenda section
/// (first 20% or 50K chars), then look for the same items in the remainder.
pub fn chunk_by_patterns(text: &str) -> Vec<DetectedItem> {
    if text.is_empty() {
        return Vec::new();
    }

    let agenda_section_size = clamp_boundary(text, std::cmp::min(text.len() / 5, 50_000));
    let agenda_section = &text[..agenda_section_size];

    static START_MARKERS: OnceLock<Vec<Regex>> = OnceLock::new();
    static END_MARKERS: OnceLock<Vec<Regex>> = OnceLock::new();
    let start_markers = START_MARKERS.get_or_init(|| {
        [
            r"BUSINESS\s+ITEMS?",
            r"ACTION\s+ITEMS?",
            r"CONSENT\s+(CALENDAR|AGENDA)",
            r"REGULAR\s+AGENDA",
            r"DISCUSSION\s+ITEMS?",
            r"PUBLIC\s+HEARINGS?",
            r"INFORMATION\s+REPORTS?",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("regex"))
        .collect()
    });
    let end_markers = END_MARKERS.get_or_init(|| {
        [
            r"ADJOURNMENT",
            r"(?m)^\d+\s+(MINUTES|TRANSCRIPT)",
            r"Item\s+\d+[:\s]+Staff Report Pg\.",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("regex"))
        .collect()
    });

    // Narrow to the real agenda listing when both markers are present
    let mut agenda_start = 0;
    let mut found_start = false;
    for re in start_markers.iter() {
        if let Some(m) = re.find(agenda_section) {
            if m.start() > agenda_start {
                agenda_start = m.start();
                found_start = true;
            }
        }
    }

    let mut agenda_end = agenda_section_size;
    let mut found_end = false;
    for re in end_markers.iter() {
        if let Some(m) = re.find(&agenda_section[agenda_start..]) {
            agenda_end = agenda_start + m.start();
            found_end = true;
            break;
        }
    }

    let actual_agenda = if found_start && found_end {
        &agenda_section[agenda_start..agenda_end]
    } else {
        agenda_section
    };

    // PASS 1: extract item markers with titles
    let mut agenda_items: Vec<PatternItem> = Vec::new();
    for pattern in agenda_patterns().iter() {
        for caps in pattern.captures_iter(actual_agenda) {
            let number = caps[1].to_string();
            let mut title = caps[2].trim().to_string();

            if title.len() < 15
                || matches!(
                    title.to_uppercase().as_str(),
                    "MINUTES" | "PARKS" | "RECREATION" | "COMMISSION" | "MEETING" | "REGULAR"
                )
            {
                continue;
            }

            title = whitespace_re().replace_all(&title, " ").to_string();
            static CEQA: OnceLock<Regex> = OnceLock::new();
            let ceqa = CEQA.get_or_init(|| Regex::new(r"(?i);?\s*CEQA[^;]*$").expect("regex"));
            title = ceqa.replace(&title, "").to_string();

            agenda_items.push(PatternItem {
                number,
                title: truncate_chars(&title, 150).to_string(),
            });
        }
    }

    if agenda_items.is_empty() {
        log::info!(
            "[Chunker] No agenda items found in agenda section (searched {} chars)",
            actual_agenda.len()
        );
        return Vec::new();
    }

    log::info!(
        "[Chunker] Found {} items in agenda section",
        agenda_items.len()
    );

    // PASS 2: find where these items appear again in the body
    let mut split_points: Vec<usize> = vec![0];
    let search_start = agenda_section_size;
    let remainder = &text[search_start..];

    for item in &agenda_items {
        let pattern = format!(
            "(?i){}",
            flexible_title_pattern(truncate_chars(&item.title, 50))
        );
        let found = Regex::new(&pattern)
            .ok()
            .and_then(|re| re.find(remainder))
            .map(|m| search_start + m.start())
            .or_else(|| {
                // Fallback: just the item number pattern
                let num_pattern = format!(r"\n\s*{}\.\s+", regex::escape(&item.number));
                Regex::new(&num_pattern)
                    .ok()
                    .and_then(|re| re.find(remainder))
                    .map(|m| search_start + m.start())
            });

        if let Some(pos) = found {
            split_points.push(pos);
        }
    }

    split_points.sort_unstable();
    split_points.dedup();
    split_points.push(text.len());

    // Need at least 2 items beyond the agenda header
    if split_points.len() < 3 {
        log::info!(
            "[Chunker] Only {} boundaries found - processing monolithically",
            split_points.len().saturating_sub(2)
        );
        return Vec::new();
    }

    // Build chunks, dropping the small agenda-header chunk at the front
    struct RawChunk<'a> {
        start: usize,
        text: &'a str,
        item_idx: Option<usize>,
    }

    let mut chunks: Vec<RawChunk> = Vec::new();
    for i in 1..split_points.len() {
        let chunk_text = &text[split_points[i - 1]..split_points[i]];
        let start = split_points[i - 1];

        let item_idx = if start == 0 {
            None
        } else {
            let preview = truncate_chars(chunk_text, 200);
            agenda_items.iter().position(|item| {
                Regex::new(&format!(r"\n\s*{}\.\s+", regex::escape(&item.number)))
                    .map(|re| re.is_match(preview))
                    .unwrap_or(false)
            })
        };

        chunks.push(RawChunk {
            start,
            text: chunk_text,
            item_idx,
        });
    }

    let meaningful: Vec<&RawChunk> = chunks
        .iter()
        .filter(|c| !(c.text.len() < 1000 && c.start == 0))
        .collect();

    if meaningful.len() <= 1 {
        log::info!(
            "[Chunker] Only {} meaningful chunks - processing monolithically",
            meaningful.len()
        );
        return Vec::new();
    }

    if meaningful.len() > MAX_CHUNKS {
        log::warn!(
            "[Chunker] {} chunks detected - too many! Processing monolithically",
            meaningful.len()
        );
        return Vec::new();
    }

    log::info!(
        "[Chunker] Created {} chunks from {} agenda items",
        meaningful.len(),
        agenda_items.len()
    );

    meaningful
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let title = match chunk.item_idx {
                Some(idx) => {
                    let item = &agenda_items[idx];
                    format!("{}. {}", item.number, item.title)
                }
                None => extract_fallback_title(chunk.text, i),
            };

            DetectedItem {
                sequence: (i + 1) as i64,
                title,
                text: chunk.text.to_string(),
                start_page: page_marker_re()
                    .captures(truncate_chars(chunk.text, 500))
                    .and_then(|c| c[1].parse().ok()),
            }
        })
        .collect()
}

fn extract_fallback_title(chunk_text: &str, index: usize) -> String {
    let preview = truncate_chars(chunk_text, 300);
    for pattern in agenda_patterns().iter() {
        if let Some(caps) = pattern.captures(preview) {
            if let Some(title) = caps.get(2) {
                let title = title.as_str().trim();
                if !title.is_empty() {
                    return format!("{}. {}", &caps[1], truncate_chars(title, 100));
                }
            }
        }
    }
    format!("Section {}", index + 1)
}
