//! Participation info extraction - contact metadata from meeting text.
//!
//! Runs BEFORE AI summarization so search indexes carry contact info even
//! when the LLM step fails. Works on full page text (HTML agendas) and on
//! extracted PDF text alike.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::ParticipationInfo;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("regex")
    })
}

fn phone_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            // "Phone: 1(669)900-6833" - prefixed form avoids matching zoom ids
            Regex::new(r"(?i)phone[:\s]+(\+?1?\s*\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4})")
                .expect("regex"),
            Regex::new(r"\+?1?\s*\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}").expect("regex"),
            Regex::new(r"\b\d{3}-\d{3}-\d{4}\b").expect("regex"),
        ]
    })
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]\)]+"#).expect("regex"))
}

fn meeting_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)meeting\s*id[:\s]+(\d{3}[\s-]?\d{3,4}[\s-]?\d{4})").expect("regex")
    })
}

const VIRTUAL_DOMAINS: &[&str] = &[
    "zoom.us",
    "meet.google.com",
    "teams.microsoft.com",
    "webex.com",
    "gotomeeting.com",
];

const HYBRID_KEYWORDS: &[&str] = &[
    "hybrid",
    "in-person and virtual",
    "attend in person or",
    "zoom or in person",
];

const EMAIL_SKIP: &[&str] = &["example.com", "test@", "noreply"];

/// Normalize a phone match to `+1XXXXXXXXXX`. Returns None when the digit
/// count doesn't look like a US number.
fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Some(format!("+1{}", digits)),
        11 if digits.starts_with('1') => Some(format!("+{}", digits)),
        _ => None,
    }
}

/// Extract participation info from meeting text. Returns None when nothing
/// was found.
pub fn parse_participation_info(text: &str) -> Option<ParticipationInfo> {
    if text.is_empty() {
        return None;
    }

    let text_lower = text.to_lowercase();
    let mut info = ParticipationInfo::default();

    // Email, filtering spam/placeholders
    for m in email_re().find_iter(text) {
        let candidate = m.as_str();
        let lower = candidate.to_lowercase();
        if !EMAIL_SKIP.iter().any(|skip| lower.contains(skip)) {
            info.email = Some(candidate.to_string());
            break;
        }
    }

    // Phone
    'phones: for re in phone_res().iter() {
        for caps in re.captures_iter(text) {
            let raw = caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str());
            if let Some(phone) = raw.and_then(normalize_phone) {
                info.phone = Some(phone);
                break 'phones;
            }
        }
    }

    // Virtual meeting URLs
    for m in url_re().find_iter(text) {
        let candidate = m.as_str();
        let lower = candidate.to_lowercase();
        if VIRTUAL_DOMAINS.iter().any(|d| lower.contains(d)) {
            info.virtual_url = Some(candidate.to_string());
            break;
        }
    }

    // Zoom meeting id, only when zoom is mentioned at all
    if text_lower.contains("zoom") {
        if let Some(caps) = meeting_id_re().captures(text) {
            info.meeting_id = Some(caps[1].trim().to_string());
        }
    }

    // Hybrid vs virtual-only
    if HYBRID_KEYWORDS.iter().any(|kw| text_lower.contains(kw)) {
        info.is_hybrid = Some(true);
    } else if info.virtual_url.is_some() {
        info.is_virtual_only = Some(true);
    }

    if info.is_empty() {
        None
    } else {
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_none() {
        assert!(parse_participation_info("").is_none());
        assert!(parse_participation_info("Nothing relevant here.").is_none());
    }

    #[test]
    fn test_email_extraction_skips_placeholders() {
        let text = "Contact noreply@city.gov or clerk@cityofpaloalto.org for details";
        let info = parse_participation_info(text).expect("info");
        assert_eq!(info.email.as_deref(), Some("clerk@cityofpaloalto.org"));
    }

    #[test]
    fn test_phone_normalization() {
        let info = parse_participation_info("Call (650) 329-2571 to participate").expect("info");
        assert_eq!(info.phone.as_deref(), Some("+16503292571"));

        let info = parse_participation_info("Phone: 1(669)900-6833").expect("info");
        assert_eq!(info.phone.as_deref(), Some("+16699006833"));
    }

    #[test]
    fn test_virtual_url_and_meeting_id() {
        let text = "Join via Zoom at https://cityofpaloalto.zoom.us/j/98765432100 \
                    Meeting ID: 987 6543 2100";
        let info = parse_participation_info(text).expect("info");
        assert_eq!(
            info.virtual_url.as_deref(),
            Some("https://cityofpaloalto.zoom.us/j/98765432100")
        );
        assert_eq!(info.meeting_id.as_deref(), Some("987 6543 2100"));
        assert_eq!(info.is_virtual_only, Some(true));
    }

    #[test]
    fn test_hybrid_detection_wins_over_virtual_only() {
        let text = "This is a hybrid meeting. Join at https://zoom.us/j/123";
        let info = parse_participation_info(text).expect("info");
        assert_eq!(info.is_hybrid, Some(true));
        assert!(info.is_virtual_only.is_none());
    }

    #[test]
    fn test_non_virtual_urls_ignored() {
        let text = "Agenda posted at https://cityofpaloalto.org/agendas";
        assert!(parse_participation_info(text).is_none());
    }

    #[test]
    fn test_url_stops_at_closing_paren() {
        let text = "(see https://zoom.us/j/5551112222) for access";
        let info = parse_participation_info(text).expect("info");
        assert_eq!(info.virtual_url.as_deref(), Some("https://zoom.us/j/5551112222"));
    }
}
