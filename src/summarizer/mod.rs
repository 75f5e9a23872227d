//! LLM orchestration: model selection, prompt management, response parsing.
//!
//! Two logical model tiers. The small tier handles documents under ~200K
//! chars and 50 estimated pages; anything bigger routes to the large tier.
//! Prompts come from a versioned JSON file; v2 uses JSON structured output
//! with a response schema, v1 is the legacy sentinel-line text format.

pub mod gemini;

use std::path::Path;

use serde_json::Value;

use crate::error::SummarizeError;
use crate::parsing::pdf::estimate_page_count;
use gemini::{BatchRequest, GenerationConfig, GeminiClient, ThinkingConfig};

const SMALL_TIER_MAX_CHARS: usize = 200_000;
const SMALL_TIER_MAX_PAGES: u32 = 50;

const SMALL_MODEL: &str = "gemini-2.5-flash-lite";
const LARGE_MODEL: &str = "gemini-2.5-flash";

/// Batch poll cadence and hard timeout.
const BATCH_POLL_SECS: u64 = 10;
const BATCH_TIMEOUT_SECS: u64 = 1800;

const EMBEDDED_PROMPTS_V2: &str = include_str!("../../assets/prompts_v2.json");

/// Logical model tier, picked by document size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Small,
    Large,
}

impl ModelTier {
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelTier::Small => SMALL_MODEL,
            ModelTier::Large => LARGE_MODEL,
        }
    }

    /// Size routing: small iff under both the char and page thresholds.
    pub fn for_document(text_size: usize, page_count: u32) -> ModelTier {
        if text_size < SMALL_TIER_MAX_CHARS && page_count <= SMALL_TIER_MAX_PAGES {
            ModelTier::Small
        } else {
            ModelTier::Large
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptsVersion {
    V1,
    V2,
}

/// Prompt templates loaded once at startup.
pub struct PromptLibrary {
    prompts: Value,
    pub version: PromptsVersion,
}

impl PromptLibrary {
    /// Load from the data dir: `prompts_v2.json` preferred, `prompts.json`
    /// legacy, embedded v2 as the fallback.
    pub fn load(data_dir: &Path) -> PromptLibrary {
        let v2_path = data_dir.join("prompts_v2.json");
        let v1_path = data_dir.join("prompts.json");

        if let Ok(raw) = std::fs::read_to_string(&v2_path) {
            if let Ok(prompts) = serde_json::from_str(&raw) {
                log::info!("[Summarizer] Using prompts_v2.json (JSON structured output)");
                return PromptLibrary {
                    prompts,
                    version: PromptsVersion::V2,
                };
            }
            log::warn!("[Summarizer] prompts_v2.json unreadable, trying legacy");
        }

        if let Ok(raw) = std::fs::read_to_string(&v1_path) {
            if let Ok(prompts) = serde_json::from_str(&raw) {
                log::info!("[Summarizer] Using prompts.json (legacy text parsing)");
                return PromptLibrary {
                    prompts,
                    version: PromptsVersion::V1,
                };
            }
        }

        log::info!("[Summarizer] Using embedded prompts (v2)");
        PromptLibrary {
            prompts: serde_json::from_str(EMBEDDED_PROMPTS_V2).expect("embedded prompts parse"),
            version: PromptsVersion::V2,
        }
    }

    pub fn embedded() -> PromptLibrary {
        PromptLibrary {
            prompts: serde_json::from_str(EMBEDDED_PROMPTS_V2).expect("embedded prompts parse"),
            version: PromptsVersion::V2,
        }
    }

    /// Interpolate a named template. Every `{variable}` in the template must
    /// have a binding.
    pub fn get(
        &self,
        category: &str,
        name: &str,
        variables: &[(&str, &str)],
    ) -> Result<String, SummarizeError> {
        let template = self
            .prompts
            .pointer(&format!("/{}/{}/template", category, name))
            .and_then(|t| t.as_str())
            .ok_or_else(|| SummarizeError::PromptNotFound {
                category: category.to_string(),
                name: name.to_string(),
            })?;

        // Check bindings against the template BEFORE substituting, so braces
        // inside substituted document text never read as placeholders
        static PLACEHOLDER: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        let placeholder_re = PLACEHOLDER
            .get_or_init(|| regex::Regex::new(r"\{([a-z_]+)\}").expect("regex"));
        for caps in placeholder_re.captures_iter(template) {
            let variable = &caps[1];
            if !variables.iter().any(|(var, _)| *var == variable) {
                return Err(SummarizeError::MissingVariable {
                    category: category.to_string(),
                    name: name.to_string(),
                    variable: variable.to_string(),
                });
            }
        }

        let mut rendered = template.to_string();
        for (var, value) in variables {
            rendered = rendered.replace(&format!("{{{}}}", var), value);
        }

        Ok(rendered)
    }

    pub fn response_schema(&self, category: &str, name: &str) -> Option<Value> {
        self.prompts
            .pointer(&format!("/{}/{}/response_schema", category, name))
            .cloned()
    }
}

/// Thinking budget policy by document complexity.
///
/// Small documents skip thinking for speed; medium documents get a modest
/// budget on the small model (which doesn't think by default) and the
/// provider default on the large model; anything bigger gets an unbounded
/// dynamic budget.
fn thinking_config(page_count: u32, text_size: usize, tier: ModelTier) -> GenerationConfig {
    let base = GenerationConfig {
        temperature: 0.3,
        max_output_tokens: 8192,
        ..Default::default()
    };

    if page_count <= 10 && text_size <= 30_000 {
        log::info!(
            "[Summarizer] Simple document ({} pages) - disabling thinking for speed",
            page_count
        );
        return GenerationConfig {
            thinking_config: Some(ThinkingConfig { thinking_budget: 0 }),
            ..base
        };
    }

    if page_count <= 50 && text_size <= 150_000 {
        log::info!(
            "[Summarizer] Medium document ({} pages) - using moderate thinking",
            page_count
        );
        return match tier {
            ModelTier::Small => GenerationConfig {
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: 2048,
                }),
                ..base
            },
            ModelTier::Large => base,
        };
    }

    log::info!(
        "[Summarizer] Complex document ({} pages) - using dynamic thinking",
        page_count
    );
    GenerationConfig {
        thinking_config: Some(ThinkingConfig {
            thinking_budget: -1,
        }),
        ..base
    }
}

/// One item in a batch submission.
#[derive(Debug, Clone)]
pub struct ItemRequest {
    pub item_id: String,
    pub title: String,
    /// Pre-extracted, concatenated attachment text.
    pub text: String,
    pub sequence: i64,
}

/// Per-item batch outcome. Failures never cross-contaminate other items.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub item_id: String,
    pub success: bool,
    pub summary: Option<String>,
    pub topics: Vec<String>,
    pub error: Option<String>,
}

impl ItemResult {
    fn failure(item_id: &str, error: impl Into<String>) -> ItemResult {
        ItemResult {
            item_id: item_id.to_string(),
            success: false,
            summary: None,
            topics: Vec::new(),
            error: Some(error.into()),
        }
    }
}

pub struct Summarizer {
    client: GeminiClient,
    prompts: PromptLibrary,
    /// Comma-joined canonical topic examples fed to the item template.
    topic_examples: String,
}

impl Summarizer {
    pub fn new(
        api_key: &str,
        prompts: PromptLibrary,
        topic_examples: String,
    ) -> Result<Self, SummarizeError> {
        Ok(Summarizer {
            client: GeminiClient::new(api_key)?,
            prompts,
            topic_examples,
        })
    }

    /// Summarize a full meeting packet. Prompt variant and thinking budget
    /// follow document size.
    pub async fn summarize_meeting(&self, text: &str) -> Result<String, SummarizeError> {
        let text_size = text.len();
        let page_count = estimate_page_count(text);
        let tier = ModelTier::for_document(text_size, page_count);

        log::info!(
            "[Summarizer] Summarizing {} pages ({} chars) using {}",
            page_count,
            text_size,
            tier.model_name()
        );

        let prompt_name = if page_count <= 30 {
            "short_agenda"
        } else {
            "comprehensive"
        };
        let prompt = self.prompts.get("meeting", prompt_name, &[("text", text)])?;
        let config = thinking_config(page_count, text_size, tier);

        self.client
            .generate_content(tier.model_name(), &prompt, &config)
            .await
    }

    fn item_prompt(&self, title: &str, text: &str) -> Result<String, SummarizeError> {
        self.prompts.get(
            "item",
            "standard",
            &[
                ("title", title),
                ("text", text),
                ("topic_examples", &self.topic_examples),
            ],
        )
    }

    fn item_config(&self) -> GenerationConfig {
        let mut config = GenerationConfig {
            temperature: 0.3,
            max_output_tokens: 2048,
            ..Default::default()
        };
        if self.prompts.version == PromptsVersion::V2 {
            config.response_mime_type = Some("application/json".to_string());
            config.response_schema = self.prompts.response_schema("item", "standard");
        }
        config
    }

    /// Summarize a single agenda item. Returns the assembled summary
    /// markdown and the raw topics for the caller to normalize.
    pub async fn summarize_item(
        &self,
        item_title: &str,
        text: &str,
    ) -> Result<(String, Vec<String>), SummarizeError> {
        let page_count = estimate_page_count(text);
        let tier = ModelTier::for_document(text.len(), page_count);

        log::info!(
            "[Summarizer] Summarizing item '{}' ({} pages, {} chars)",
            truncate(item_title, 50),
            page_count,
            text.len()
        );

        let prompt = self.item_prompt(item_title, text)?;
        let response = self
            .client
            .generate_content(tier.model_name(), &prompt, &self.item_config())
            .await?;

        Ok(parse_item_response(self.prompts.version, &response))
    }

    /// Process item requests as a single batch job: submit, poll every 10s
    /// with a 30 minute cap, map responses back by position. A submission or
    /// job-level failure yields a failure entry for every request; response
    /// slot errors stay per-request.
    pub async fn summarize_batch(&self, requests: &[ItemRequest]) -> Vec<ItemResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        log::info!(
            "[Summarizer] Processing {} items via batch API",
            requests.len()
        );

        let batch: Result<Vec<BatchRequest>, SummarizeError> = requests
            .iter()
            .map(|req| {
                Ok(BatchRequest {
                    prompt: self.item_prompt(&req.title, &req.text)?,
                    config: self.item_config(),
                })
            })
            .collect();

        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                return requests
                    .iter()
                    .map(|r| ItemResult::failure(&r.item_id, e.to_string()))
                    .collect()
            }
        };

        let display_name = format!("item-batch-{}", chrono::Utc::now().timestamp());
        let name = match self
            .client
            .create_batch(LARGE_MODEL, &batch, &display_name)
            .await
        {
            Ok(name) => name,
            Err(e) => {
                log::error!("[Summarizer] Batch submission failed: {}", e);
                return requests
                    .iter()
                    .map(|r| ItemResult::failure(&r.item_id, e.to_string()))
                    .collect();
            }
        };

        log::info!("[Summarizer] Submitted batch {}", name);

        let mut waited = 0u64;
        let job = loop {
            if waited >= BATCH_TIMEOUT_SECS {
                log::error!("[Summarizer] Batch timed out after {}s", BATCH_TIMEOUT_SECS);
                return requests
                    .iter()
                    .map(|r| ItemResult::failure(&r.item_id, "Batch timeout"))
                    .collect();
            }

            match self.client.get_batch(&name).await {
                Ok(job) if job.is_terminal() => {
                    log::info!("[Summarizer] Batch {} completed: {}", name, job.state);
                    break job;
                }
                Ok(job) => {
                    if waited % 30 == 0 {
                        log::info!(
                            "[Summarizer] Batch processing... ({}s, state: {})",
                            waited,
                            job.state
                        );
                    }
                }
                Err(e) => {
                    log::warn!("[Summarizer] Batch poll failed (will retry): {}", e);
                }
            }

            tokio::time::sleep(std::time::Duration::from_secs(BATCH_POLL_SECS)).await;
            waited += BATCH_POLL_SECS;
        };

        if !job.succeeded() {
            log::error!("[Summarizer] Batch failed: {}", job.state);
            return requests
                .iter()
                .map(|r| ItemResult::failure(&r.item_id, format!("Batch failed: {}", job.state)))
                .collect();
        }

        let responses = job.responses.unwrap_or_default();
        let mut results = Vec::with_capacity(requests.len());

        for (i, request) in requests.iter().enumerate() {
            let result = match responses.get(i) {
                Some(slot) => {
                    if let Some(error) = &slot.error {
                        log::error!("[Summarizer] Item {} failed: {}", request.item_id, error);
                        ItemResult::failure(&request.item_id, error.clone())
                    } else if let Some(text) = &slot.text {
                        let (summary, topics) = parse_item_response(self.prompts.version, text);
                        ItemResult {
                            item_id: request.item_id.clone(),
                            success: true,
                            summary: Some(summary),
                            topics,
                            error: None,
                        }
                    } else {
                        ItemResult::failure(&request.item_id, "Empty response")
                    }
                }
                None => ItemResult::failure(&request.item_id, "No response slot in batch result"),
            };
            results.push(result);
        }

        let successful = results.iter().filter(|r| r.success).count();
        log::info!(
            "[Summarizer] Batch complete: {}/{} successful",
            successful,
            results.len()
        );

        results
    }
}

/// Parse an item response into (summary, topics).
///
/// v2 responses are JSON matching the item schema; the stored summary is the
/// markdown assembly of its sections. Invalid JSON falls back to the v1
/// sentinel parsing; an unparseable response degrades to the first 500
/// chars.
pub fn parse_item_response(version: PromptsVersion, response_text: &str) -> (String, Vec<String>) {
    let response_text = response_text.trim();

    if version == PromptsVersion::V2 {
        match serde_json::from_str::<Value>(response_text) {
            Ok(data) => {
                let field = |key: &str| {
                    data.get(key)
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string()
                };

                let thinking = field("thinking");
                let summary_md = field("summary_markdown");
                let impact_md = field("citizen_impact_markdown");
                let confidence = field("confidence");

                let mut parts = Vec::new();
                if !thinking.is_empty() {
                    parts.push(format!("## Thinking\n\n{}\n", thinking));
                }
                if !summary_md.is_empty() {
                    parts.push(format!("## Summary\n\n{}\n", summary_md));
                }
                if !impact_md.is_empty() {
                    parts.push(format!("## Citizen Impact\n\n{}\n", impact_md));
                }
                if !confidence.is_empty() {
                    parts.push(format!("## Confidence\n\n{}", confidence));
                }

                let topics = data
                    .get("topics")
                    .and_then(|t| t.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();

                return (parts.join("\n"), topics);
            }
            Err(e) => {
                log::error!("[Summarizer] Failed to parse JSON response: {}", e);
                // Fall through to sentinel parsing
            }
        }
    }

    // v1: sentinel-line parsing
    let mut summary = String::new();
    let mut topics = Vec::new();

    for line in response_text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("SUMMARY:") {
            summary = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("TOPICS:") {
            topics = rest
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    if summary.is_empty() {
        summary = truncate(response_text, 500).to_string();
        log::warn!("[Summarizer] Failed to parse response, using truncated text");
    }

    (summary, topics)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_selection_by_size() {
        assert_eq!(ModelTier::for_document(10_000, 5), ModelTier::Small);
        assert_eq!(ModelTier::for_document(199_999, 50), ModelTier::Small);
        assert_eq!(ModelTier::for_document(200_000, 50), ModelTier::Large);
        assert_eq!(ModelTier::for_document(10_000, 51), ModelTier::Large);
    }

    #[test]
    fn test_thinking_disabled_for_simple_documents() {
        let config = thinking_config(10, 30_000, ModelTier::Small);
        assert_eq!(
            config.thinking_config.expect("thinking config").thinking_budget,
            0
        );
    }

    #[test]
    fn test_moderate_thinking_only_explicit_on_small_tier() {
        let config = thinking_config(30, 100_000, ModelTier::Small);
        assert_eq!(
            config.thinking_config.expect("thinking config").thinking_budget,
            2048
        );

        // Large tier thinks by default; no explicit budget
        let config = thinking_config(30, 100_000, ModelTier::Large);
        assert!(config.thinking_config.is_none());
    }

    #[test]
    fn test_unbounded_thinking_for_complex_documents() {
        let config = thinking_config(80, 300_000, ModelTier::Large);
        assert_eq!(
            config.thinking_config.expect("thinking config").thinking_budget,
            -1
        );
    }

    #[test]
    fn test_prompt_interpolation() {
        let lib = PromptLibrary::embedded();
        let prompt = lib
            .get("meeting", "short_agenda", &[("text", "AGENDA BODY")])
            .expect("prompt");
        assert!(prompt.contains("AGENDA BODY"));
        assert!(!prompt.contains("{text}"));
    }

    #[test]
    fn test_prompt_missing_variable_detected() {
        let lib = PromptLibrary::embedded();
        let err = lib.get("item", "standard", &[("title", "T")]).unwrap_err();
        assert!(matches!(err, SummarizeError::MissingVariable { .. }));
    }

    #[test]
    fn test_prompt_not_found() {
        let lib = PromptLibrary::embedded();
        let err = lib.get("meeting", "nonexistent", &[]).unwrap_err();
        assert!(matches!(err, SummarizeError::PromptNotFound { .. }));
    }

    #[test]
    fn test_item_schema_present_in_v2() {
        let lib = PromptLibrary::embedded();
        let schema = lib.response_schema("item", "standard").expect("schema");
        assert_eq!(schema["type"], "object");
        assert!(schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "summary_markdown"));
    }

    #[test]
    fn test_parse_v2_json_response() {
        let response = serde_json::json!({
            "thinking": "traced the fiscal impact",
            "summary_markdown": "Approves a paving contract.",
            "citizen_impact_markdown": "Smoother streets downtown.",
            "confidence": "high",
            "topics": ["transportation", "contracts"]
        })
        .to_string();

        let (summary, topics) = parse_item_response(PromptsVersion::V2, &response);
        assert!(summary.contains("## Thinking"));
        assert!(summary.contains("## Summary"));
        assert!(summary.contains("Approves a paving contract."));
        assert!(summary.contains("## Citizen Impact"));
        assert!(summary.contains("## Confidence"));
        assert_eq!(topics, vec!["transportation", "contracts"]);
    }

    #[test]
    fn test_parse_v2_invalid_json_falls_back_to_sentinels() {
        let response = "SUMMARY: Approves a contract.\nTOPICS: contracts, budget";
        let (summary, topics) = parse_item_response(PromptsVersion::V2, response);
        assert_eq!(summary, "Approves a contract.");
        assert_eq!(topics, vec!["contracts", "budget"]);
    }

    #[test]
    fn test_parse_v1_sentinel_response() {
        let response = "Preamble line\nSUMMARY: The item rezones a parcel.\nTOPICS: zoning";
        let (summary, topics) = parse_item_response(PromptsVersion::V1, response);
        assert_eq!(summary, "The item rezones a parcel.");
        assert_eq!(topics, vec!["zoning"]);
    }

    #[test]
    fn test_parse_unstructured_response_truncates() {
        let long = "word ".repeat(200);
        let (summary, topics) = parse_item_response(PromptsVersion::V1, &long);
        assert!(summary.chars().count() <= 500);
        assert!(topics.is_empty());
    }
}
