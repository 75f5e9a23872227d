//! Item filtering - two-tier: adapter level (skip entirely) vs processor
//! level (skip LLM).
//!
//! These run on every item of every synced meeting, so each pattern set is
//! compiled once per process and reused.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};

fn compile(patterns: &[&str]) -> RegexSet {
    RegexSet::new(patterns.iter().map(|p| format!("(?i){}", p))).expect("filter patterns compile")
}

/// Meeting level: test/demo meetings to skip entirely.
const MEETING_SKIP_PATTERNS: &[&str] = &[
    r"\bmock\b",
    r"\btest\b",
    r"\bdemo\b",
    r"\btraining\b",
    r"\bpractice\b",
];

/// Adapter level: items with zero metadata value (not saved).
const ADAPTER_SKIP_PATTERNS: &[&str] = &[
    r"roll call",
    r"invocation",
    r"pledge of allegiance",
    r"approval of (minutes|agenda)",
    r"approval of.*minutes",
    r"approve the minutes",
    r"adopt minutes",
    r"review of minutes",
    r"^minutes of",
    r"draft.*minutes",
    r"adjourn",
    r"public comment",
    r"communications",
    r"time fixed for next",
    r"identify items (to|for)",
    r"meeting schedule for",
];

/// Processor level: items worth saving but not LLM-processing.
const PROCESSOR_SKIP_PATTERNS: &[&str] = &[
    r"proclamation",
    r"commendation",
    r"recognition",
    r"ceremonial",
    r"congratulations (to|extended to|for)",
    r"tribute to (late|the late)",
    r"\bon (his|her|their) retirement\b",
    r"retirement of",
    r"happy birthday",
    r"birthday (wishes|greetings|recognition|celebration)",
    r"appointment",
    r"confirmation",
    r"liquor license",
    r"beer (and|&) wine license",
    r"alcoholic beverage license",
    r"issuance of permits? for sign",
    r"signboard permit",
    r"fee waiver for",
    r"(various )?small claims?",
];

/// High token cost, low value attachments (scanned form letters, bulk docs).
const PUBLIC_COMMENT_PATTERNS: &[&str] = &[
    r"public comment",
    r"public correspondence",
    r"comment letter",
    r"comment ltrs",
    r"written comment",
    r"public hearing comment",
    r"citizen comment",
    r"correspondence received",
    r"public input",
    r"public testimony",
    r"letters received",
    r"petitions",
    r"pub corr",
    r"pulbic corr", // common typo in SF data
    r"comm pkt",
    r"cmte pkt",
    r"committee packet",
    r"board pkt",
    r"co-?sponsor(ship)?\s*(request|ltr|letter)",
    r"sponsor(ship)?\s*request",
];

/// Massive PDFs with no policy content (property lists, parcel tables).
const PARCEL_TABLE_PATTERNS: &[&str] = &[
    r"parcel table",
    r"parcel list",
    r"parcel map",
    r"tax parcel",
    r"property list",
    r"property table",
    r"assessor",
    r"apn list",
    r"parcel number",
];

/// Boilerplate cooperative-purchasing and contract documents.
const BOILERPLATE_CONTRACT_PATTERNS: &[&str] = &[
    r"omnia partners contract",
    r"sourcewell contract",
    r"naspo valuepoint",
    r"u\.?s\.? communities",
    r"hgac.?buy",
    r"master agreement",
    r"terms and conditions",
    r"general conditions",
    r"insurance certificate",
    r"certificate of insurance",
    r"w-?9",
    r"bid tabulation",
];

/// SF procedural routing forms; the legislative content lives in "Leg Ver*"
/// and "PC Transmittal" attachments instead.
const SF_PROCEDURAL_PATTERNS: &[&str] = &[
    r"ceqa det",
    r"ceqa determination",
    r"referral ceqa",
    r"referral fyi",
    r"myr memo",
    r"mayor.?s? memo",
    r"comm rpt rqst",
    r"committee report request",
    r"referral.*pc\b",
    r"hearing notice",
];

/// Environmental Impact Reports - 200-500+ page technical documents.
const EIR_PATTERNS: &[&str] = &[
    r"\bfeir\b",
    r"\bdeir\b",
    r"\bseir\b",
    r"\beir\b",
    r"environmental impact report",
    r"ceqa findings",
    r"initial study",
    r"negative declaration",
    r"notice of preparation",
];

/// Administrative matter types (not legislative).
const SKIP_MATTER_TYPES: &[&str] = &[
    "minutes (min)",
    "introduction & referral calendar (irc)",
    "information item (inf)",
    "minutes",
    "min",
    "irc",
    "inf",
    "information",
    "referral calendar",
];

fn meeting_skip_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| compile(MEETING_SKIP_PATTERNS))
}

fn adapter_skip_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| compile(ADAPTER_SKIP_PATTERNS))
}

fn processor_skip_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| compile(PROCESSOR_SKIP_PATTERNS))
}

fn attachment_skip_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        let all: Vec<&str> = PUBLIC_COMMENT_PATTERNS
            .iter()
            .chain(PARCEL_TABLE_PATTERNS)
            .chain(BOILERPLATE_CONTRACT_PATTERNS)
            .chain(SF_PROCEDURAL_PATTERNS)
            .chain(EIR_PATTERNS)
            .copied()
            .collect();
        compile(&all)
    })
}

/// Meeting level: should the entire meeting be skipped (test/demo/mock)?
pub fn should_skip_meeting(title: &str) -> bool {
    meeting_skip_set().is_match(title)
}

/// Adapter level: should the item be skipped entirely (not saved)?
pub fn should_skip_item(title: &str, item_type: &str) -> bool {
    let combined = format!("{} {}", title, item_type);
    adapter_skip_set().is_match(&combined)
}

/// Processor level: should the item skip LLM processing (but still be saved)?
pub fn should_skip_processing(title: &str, item_type: &str) -> bool {
    let combined = format!("{} {}", title, item_type);
    processor_skip_set().is_match(&combined)
}

/// Should the matter be skipped based on type (administrative/procedural)?
pub fn should_skip_matter(matter_type: &str) -> bool {
    if matter_type.is_empty() {
        return false;
    }
    let lower = matter_type.to_lowercase();
    SKIP_MATTER_TYPES.iter().any(|skip| lower.contains(skip))
}

/// Is the attachment low-value for summarization (public comments, parcel
/// tables, boilerplate contracts, procedural stubs, EIRs)?
pub fn is_low_value_attachment(name: &str) -> bool {
    attachment_skip_set().is_match(name)
}

/// "Leg Ver" attachment selection: keep at most one, preferring Ver2 over
/// Ver1 over first-seen. The incoming order is the parse order of the
/// legislation detail page, so first-seen is deterministic for a given page.
pub fn filter_leg_ver<T, F>(attachments: Vec<T>, name_of: F) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    static VER2: OnceLock<Regex> = OnceLock::new();
    static VER1: OnceLock<Regex> = OnceLock::new();
    let ver2 = VER2.get_or_init(|| Regex::new(r"(?i)leg ver\s?2").expect("regex"));
    let ver1 = VER1.get_or_init(|| Regex::new(r"(?i)leg ver\s?1").expect("regex"));

    let mut leg_vers = Vec::new();
    let mut others = Vec::new();
    for att in attachments {
        if name_of(&att).to_lowercase().contains("leg ver") {
            leg_vers.push(att);
        } else {
            others.push(att);
        }
    }

    if leg_vers.is_empty() {
        return others;
    }

    let pick = leg_vers
        .iter()
        .position(|a| ver2.is_match(&name_of(a)))
        .or_else(|| leg_vers.iter().position(|a| ver1.is_match(&name_of(a))))
        .unwrap_or(0);

    let selected = leg_vers.swap_remove(pick);
    let mut filtered = Vec::with_capacity(others.len() + 1);
    filtered.push(selected);
    filtered.extend(others);
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_skip_procedural_items() {
        assert!(should_skip_item("Roll Call", ""));
        assert!(should_skip_item("Pledge of Allegiance", ""));
        assert!(should_skip_item(
            "Approval of Draft Raleigh Board of Adjustment Minutes",
            ""
        ));
        assert!(should_skip_item("Approve the minutes of June 3", ""));
        assert!(should_skip_item("ADJOURNMENT", ""));
        assert!(should_skip_item("Public Comment Period", ""));

        assert!(!should_skip_item(
            "Ordinance rezoning 123 Main Street",
            "Ordinance"
        ));
    }

    #[test]
    fn test_processor_skip_ceremonial_items() {
        assert!(should_skip_processing("Proclamation Honoring Arbor Day", ""));
        assert!(should_skip_processing(
            "Appointment to the Planning Commission",
            ""
        ));
        assert!(should_skip_processing("Liquor License for 44 Oak St", ""));
        assert!(should_skip_processing("Various Small Claims", ""));

        assert!(!should_skip_processing(
            "Resolution approving FY26 budget",
            ""
        ));
    }

    #[test]
    fn test_processor_skip_uses_item_type() {
        // Title alone wouldn't match; the type does
        assert!(should_skip_processing("Jane Smith to Parks Board", "Appointment"));
    }

    #[test]
    fn test_meeting_skip() {
        assert!(should_skip_meeting("Mock Select Committee"));
        assert!(should_skip_meeting("Test Meeting"));
        assert!(!should_skip_meeting("City Council Regular Meeting"));
        // "test" must be a standalone word
        assert!(!should_skip_meeting("Protest Permit Hearing"));
    }

    #[test]
    fn test_attachment_skip_variants() {
        assert!(is_low_value_attachment("Public Comment Letters 06-12"));
        assert!(is_low_value_attachment("Pub Corr Chen 122525"));
        assert!(is_low_value_attachment("Pulbic Corr 0612")); // SF typo variant
        assert!(is_low_value_attachment("Parcel Table Exhibit B"));
        assert!(is_low_value_attachment("Omnia Partners Contract R-2024"));
        assert!(is_low_value_attachment("W-9 Form"));
        assert!(is_low_value_attachment("CEQA Det 2025-0042"));
        assert!(is_low_value_attachment("DEIR Volume 2"));

        assert!(!is_low_value_attachment("Staff Report 25-155-CC"));
        assert!(!is_low_value_attachment("Leg Ver2"));
    }

    #[test]
    fn test_matter_type_skip() {
        assert!(should_skip_matter("Minutes (Min)"));
        assert!(should_skip_matter("IRC"));
        assert!(should_skip_matter("Information Item (Inf)"));
        assert!(!should_skip_matter("Ordinance"));
        assert!(!should_skip_matter(""));
    }

    #[test]
    fn test_leg_ver_prefers_ver2() {
        let atts = vec!["Leg Ver1", "Leg Ver2", "Staff Report"];
        let filtered = filter_leg_ver(atts, |a| a.to_string());
        assert_eq!(filtered, vec!["Leg Ver2", "Staff Report"]);
    }

    #[test]
    fn test_leg_ver_falls_back_to_ver1() {
        let atts = vec!["Leg Ver1", "Memo"];
        let filtered = filter_leg_ver(atts, |a| a.to_string());
        assert_eq!(filtered, vec!["Leg Ver1", "Memo"]);
    }

    #[test]
    fn test_leg_ver_first_seen_when_unversioned() {
        let atts = vec!["Leg Ver A", "Leg Ver B", "Exhibit"];
        let filtered = filter_leg_ver(atts, |a| a.to_string());
        assert_eq!(filtered, vec!["Leg Ver A", "Exhibit"]);
    }

    #[test]
    fn test_leg_ver_no_leg_attachments_passthrough() {
        let atts = vec!["Staff Report", "Exhibit A"];
        let filtered = filter_leg_ver(atts, |a| a.to_string());
        assert_eq!(filtered, vec!["Staff Report", "Exhibit A"]);
    }
}
