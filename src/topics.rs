//! Topic normalization.
//!
//! Maps AI-extracted topics onto a fixed taxonomy so "affordable housing",
//! "housing element", and "housing" all land on the same canonical tag. The
//! taxonomy ships embedded in the binary; lookup structures are built once
//! at load and frozen.
//!
//! The substring fallback scans synonyms in taxonomy-file order and the
//! first hit wins, so an ambiguous input ("wildfire risk" contains both
//! "fire" and "wildfire") resolves the same way on every run. That forces
//! order-preserving structures here: the taxonomy deserializes into an
//! `IndexMap` and the scan list is a plain `Vec` in insertion order.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;

const EMBEDDED_TAXONOMY: &str = include_str!("../assets/topic_taxonomy.json");

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    taxonomy: IndexMap<String, TopicEntry>,
    prompt_examples: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TopicEntry {
    canonical: String,
    display_name: String,
    #[serde(default)]
    synonyms: Vec<String>,
}

pub struct TopicNormalizer {
    entries: IndexMap<String, TopicEntry>,
    /// lowercase(synonym or canonical) → canonical, for exact matches.
    exact: HashMap<String, String>,
    /// The same mappings in taxonomy-file order, scanned for the substring
    /// fallback. "First hit wins" refers to this order.
    synonyms_ordered: Vec<(String, String)>,
    prompt_examples: Vec<String>,
}

impl TopicNormalizer {
    /// Load the embedded taxonomy.
    pub fn new() -> Self {
        Self::from_json(EMBEDDED_TAXONOMY).expect("embedded taxonomy parses")
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: TaxonomyFile = serde_json::from_str(json)?;

        let mut exact = HashMap::new();
        let mut synonyms_ordered = Vec::new();
        for entry in file.taxonomy.values() {
            exact.insert(entry.canonical.to_lowercase(), entry.canonical.clone());
            synonyms_ordered.push((entry.canonical.to_lowercase(), entry.canonical.clone()));
            for synonym in &entry.synonyms {
                exact.insert(synonym.to_lowercase(), entry.canonical.clone());
                synonyms_ordered.push((synonym.to_lowercase(), entry.canonical.clone()));
            }
        }

        log::info!(
            "Loaded topic taxonomy: {} categories, {} total mappings",
            file.taxonomy.len(),
            exact.len()
        );

        Ok(TopicNormalizer {
            entries: file.taxonomy,
            exact,
            synonyms_ordered,
            prompt_examples: file.prompt_examples,
        })
    }

    /// Normalize a list of topics to canonical forms, deduplicated and
    /// sorted alphabetically.
    pub fn normalize(&self, topics: &[String]) -> Vec<String> {
        if topics.is_empty() {
            return Vec::new();
        }

        let mut canonical: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for topic in topics {
            if topic.trim().is_empty() {
                continue;
            }
            canonical.insert(self.normalize_single(topic));
        }

        canonical.into_iter().collect()
    }

    /// Normalize one topic: exact match, then substring containment either
    /// way in taxonomy-file order, else the lowercased original (logged as
    /// a taxonomy candidate).
    ///
    /// The substring scan is O(|topic| x |synonym list|) per unmatched
    /// topic. Fine for the handful of topics an item produces; revisit if
    /// the taxonomy grows past a few thousand synonyms.
    pub fn normalize_single(&self, topic: &str) -> String {
        let topic_lower = topic.trim().to_lowercase();
        if topic_lower.is_empty() {
            return String::new();
        }

        if let Some(canonical) = self.exact.get(&topic_lower) {
            return canonical.clone();
        }

        for (synonym, canonical) in &self.synonyms_ordered {
            if synonym.contains(&topic_lower) || topic_lower.contains(synonym.as_str()) {
                return canonical.clone();
            }
        }

        log::debug!(
            "[TopicNormalizer] Unknown topic: '{}' - consider adding to taxonomy",
            topic
        );
        topic_lower
    }

    /// Human-friendly display name for a canonical topic.
    pub fn display_name(&self, canonical_topic: &str) -> String {
        for entry in self.entries.values() {
            if entry.canonical == canonical_topic {
                return entry.display_name.clone();
            }
        }

        // Fallback: title-case the canonical
        canonical_topic
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// All canonical topics, for the API layer.
    pub fn all_canonical_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .entries
            .values()
            .map(|e| e.canonical.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Comma-joined topic examples for the item prompt.
    pub fn prompt_examples(&self) -> String {
        self.prompt_examples.join(", ")
    }
}

impl Default for TopicNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate item topics into meeting topics: count by frequency, sort
/// descending by count, ties broken by first appearance.
pub fn aggregate_topics(item_topics: &[Vec<String>]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for topics in item_topics {
        for topic in topics {
            let entry = counts.entry(topic.as_str()).or_insert(0);
            if *entry == 0 {
                order.push(topic.as_str());
            }
            *entry += 1;
        }
    }

    let mut ranked: Vec<(usize, &str)> = order
        .iter()
        .enumerate()
        .map(|(first_seen, topic)| (first_seen, *topic))
        .collect();
    ranked.sort_by(|a, b| {
        counts[b.1]
            .cmp(&counts[a.1])
            .then_with(|| a.0.cmp(&b.0))
    });

    ranked.into_iter().map(|(_, t)| t.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_synonym_match() {
        let n = TopicNormalizer::new();
        assert_eq!(
            n.normalize(&["affordable housing".to_string()]),
            vec!["housing"]
        );
        assert_eq!(n.normalize(&["rezoning".to_string()]), vec!["zoning"]);
    }

    #[test]
    fn test_canonical_maps_to_itself() {
        let n = TopicNormalizer::new();
        assert_eq!(n.normalize_single("housing"), "housing");
        assert_eq!(n.normalize_single("public_safety"), "public_safety");
    }

    #[test]
    fn test_substring_fallback() {
        let n = TopicNormalizer::new();
        // "affordable housing plan" contains the synonym "affordable housing"
        assert_eq!(n.normalize_single("affordable housing plan"), "housing");
    }

    #[test]
    fn test_ambiguous_substring_first_hit_is_file_order() {
        let n = TopicNormalizer::new();

        // Each input substring-matches synonyms in more than one category;
        // the earlier taxonomy entry wins every time:
        // "street improvements" hits transportation's "street improvement"
        // before environment's "tree" (which "street" contains)
        assert_eq!(n.normalize_single("street improvements"), "transportation");
        // "campaign finance report" hits budget's "finance" before
        // governance's "campaign finance"
        assert_eq!(n.normalize_single("campaign finance report"), "budget");
        // "wildfire risk" hits public_safety's "fire" before environment's
        // "wildfire"
        assert_eq!(n.normalize_single("wildfire risk"), "public_safety");
    }

    #[test]
    fn test_ambiguous_resolution_stable_across_instances() {
        // Two independently built normalizers must agree on every ambiguous
        // input; with an unordered map the winner would depend on per-
        // instance iteration order
        let a = TopicNormalizer::new();
        let b = TopicNormalizer::new();

        for input in [
            "street improvements",
            "campaign finance report",
            "wildfire risk",
            "fees",
            "water main",
        ] {
            assert_eq!(
                a.normalize_single(input),
                b.normalize_single(input),
                "instances disagreed on '{}'",
                input
            );
        }
    }

    #[test]
    fn test_scan_order_matches_taxonomy_file_order() {
        let n = TopicNormalizer::new();
        // housing is the first taxonomy entry, so its canonical leads the
        // ordered scan list
        assert_eq!(n.synonyms_ordered[0].1, "housing");

        // The list holds every exact mapping, in order
        assert_eq!(n.synonyms_ordered.len(), {
            let mut count = 0;
            for entry in n.entries.values() {
                count += 1 + entry.synonyms.len();
            }
            count
        });
    }

    #[test]
    fn test_unknown_topic_kept_lowercased() {
        let n = TopicNormalizer::new();
        assert_eq!(n.normalize_single("  Llama Grooming  "), "llama grooming");
    }

    #[test]
    fn test_normalize_dedupes_and_sorts() {
        let n = TopicNormalizer::new();
        let result = n.normalize(&[
            "zoning changes".to_string(),
            "affordable housing".to_string(),
            "housing element".to_string(),
            "".to_string(),
        ]);
        assert_eq!(result, vec!["housing", "zoning"]);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let n = TopicNormalizer::new();
        let inputs = vec![
            "affordable housing".to_string(),
            "bike lane".to_string(),
            "something unknown".to_string(),
        ];
        let once = n.normalize(&inputs);
        let twice = n.normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_display_name_lookup_and_fallback() {
        let n = TopicNormalizer::new();
        assert_eq!(n.display_name("public_safety"), "Public Safety");
        assert_eq!(n.display_name("made_up_topic"), "Made Up Topic");
    }

    #[test]
    fn test_aggregate_topics_frequency_order() {
        let lists = vec![
            vec!["housing".to_string(), "zoning".to_string()],
            vec!["housing".to_string(), "transportation".to_string()],
            vec!["budget".to_string(), "public_safety".to_string()],
            vec!["housing".to_string()],
        ];
        let aggregated = aggregate_topics(&lists);
        assert_eq!(
            aggregated,
            vec!["housing", "zoning", "transportation", "budget", "public_safety"]
        );
    }

    #[test]
    fn test_aggregate_topics_empty() {
        assert!(aggregate_topics(&[]).is_empty());
    }

    #[test]
    fn test_prompt_examples_joined() {
        let n = TopicNormalizer::new();
        let examples = n.prompt_examples();
        assert!(examples.contains("housing"));
        assert!(examples.contains(", "));
    }
}
