//! Minimal Gemini REST client: single-shot generation plus batch jobs.
//!
//! Only the two entry points the pipeline needs. Batch jobs are submitted
//! inline, polled by name, and read back as positionally-ordered inlined
//! responses.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HttpError, SummarizeError};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Generation parameters for one request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

/// Thinking budget: 0 disables, -1 lets the model decide.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: &'a GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(self) -> Option<String> {
        let mut out = String::new();
        for candidate in self.candidates {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Some(text) = part.text {
                        out.push_str(&text);
                    }
                }
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

/// One entry of a batch submission.
pub struct BatchRequest {
    pub prompt: String,
    pub config: GenerationConfig,
}

/// Snapshot of a polled batch job.
pub struct BatchJob {
    pub name: String,
    pub state: String,
    /// Present once the job reaches a terminal success state. Ordered by
    /// request index.
    pub responses: Option<Vec<BatchResponse>>,
}

impl BatchJob {
    pub fn is_terminal(&self) -> bool {
        ["SUCCEEDED", "FAILED", "CANCELLED", "EXPIRED"]
            .iter()
            .any(|s| self.state.ends_with(s))
    }

    pub fn succeeded(&self) -> bool {
        self.state.ends_with("SUCCEEDED")
    }
}

/// One response slot of a completed batch, mapped back by position.
pub struct BatchResponse {
    pub text: Option<String>,
    pub error: Option<String>,
}

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HttpError::Request {
                url: API_BASE.to_string(),
                source: e,
            })?;
        Ok(GeminiClient {
            client,
            api_key: api_key.to_string(),
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, SummarizeError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                SummarizeError::Http(HttpError::Request {
                    url: url.to_string(),
                    source: e,
                })
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(SummarizeError::Http(HttpError::RateLimited {
                url: url.to_string(),
            }));
        }
        if !status.is_success() {
            return Err(SummarizeError::Http(HttpError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }));
        }

        response
            .json()
            .await
            .map_err(|e| SummarizeError::BadResponse(e.to_string()))
    }

    /// Single-shot generation. Returns the concatenated candidate text.
    pub async fn generate_content(
        &self,
        model: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, SummarizeError> {
        let url = format!("{}/models/{}:generateContent", API_BASE, model);
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: config,
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| SummarizeError::BadResponse(e.to_string()))?;

        let raw = self.post_json(&url, &body).await?;
        let parsed: GenerateContentResponse =
            serde_json::from_value(raw).map_err(|e| SummarizeError::BadResponse(e.to_string()))?;

        parsed.text().ok_or(SummarizeError::EmptyResponse)
    }

    /// Submit an inline batch job. Returns the job name for polling.
    pub async fn create_batch(
        &self,
        model: &str,
        requests: &[BatchRequest],
        display_name: &str,
    ) -> Result<String, SummarizeError> {
        let url = format!("{}/models/{}:batchGenerateContent", API_BASE, model);

        let inline: Vec<Value> = requests
            .iter()
            .map(|req| {
                serde_json::json!({
                    "request": {
                        "contents": [{"role": "user", "parts": [{"text": req.prompt}]}],
                        "generationConfig": req.config,
                    }
                })
            })
            .collect();

        let body = serde_json::json!({
            "batch": {
                "displayName": display_name,
                "inputConfig": {"requests": {"requests": inline}},
            }
        });

        let raw = self.post_json(&url, &body).await?;
        raw.get("name")
            .and_then(|n| n.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                SummarizeError::BadResponse("batch job created but no name returned".to_string())
            })
    }

    /// Poll a batch job by name.
    pub async fn get_batch(&self, name: &str) -> Result<BatchJob, SummarizeError> {
        let url = format!("{}/{}", API_BASE, name);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                SummarizeError::Http(HttpError::Request {
                    url: url.clone(),
                    source: e,
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SummarizeError::Http(HttpError::Status {
                status: status.as_u16(),
                url,
            }));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| SummarizeError::BadResponse(e.to_string()))?;

        Ok(parse_batch_job(name, &raw))
    }
}

/// Decode a batch operation payload into a job snapshot.
fn parse_batch_job(name: &str, raw: &Value) -> BatchJob {
    let state = raw
        .pointer("/metadata/state")
        .or_else(|| raw.get("state"))
        .and_then(|s| s.as_str())
        .unwrap_or("UNKNOWN")
        .to_string();

    let responses = raw
        .pointer("/response/inlinedResponses/inlinedResponses")
        .or_else(|| raw.pointer("/dest/inlinedResponses"))
        .and_then(|r| r.as_array())
        .map(|slots| {
            slots
                .iter()
                .map(|slot| {
                    if let Some(err) = slot.get("error") {
                        BatchResponse {
                            text: None,
                            error: Some(err.to_string()),
                        }
                    } else {
                        let parsed: Option<GenerateContentResponse> = slot
                            .get("response")
                            .cloned()
                            .and_then(|v| serde_json::from_value(v).ok());
                        BatchResponse {
                            text: parsed.and_then(|p| p.text()),
                            error: None,
                        }
                    }
                })
                .collect()
        });

    BatchJob {
        name: name.to_string(),
        state,
        responses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_serialization_omits_unset() {
        let config = GenerationConfig {
            temperature: 0.3,
            max_output_tokens: 2048,
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["temperature"], 0.3);
        assert_eq!(json["maxOutputTokens"], 2048);
        assert!(json.get("responseMimeType").is_none());
        assert!(json.get("thinkingConfig").is_none());
    }

    #[test]
    fn test_thinking_config_serialization() {
        let config = GenerationConfig {
            temperature: 0.3,
            max_output_tokens: 8192,
            thinking_config: Some(ThinkingConfig { thinking_budget: 0 }),
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["thinkingConfig"]["thinkingBudget"], 0);
    }

    #[test]
    fn test_parse_batch_job_running() {
        let raw = serde_json::json!({
            "metadata": {"state": "BATCH_STATE_RUNNING"}
        });
        let job = parse_batch_job("batches/abc", &raw);
        assert_eq!(job.state, "BATCH_STATE_RUNNING");
        assert!(!job.is_terminal());
        assert!(job.responses.is_none());
    }

    #[test]
    fn test_parse_batch_job_succeeded_with_mixed_slots() {
        let raw = serde_json::json!({
            "metadata": {"state": "BATCH_STATE_SUCCEEDED"},
            "response": {"inlinedResponses": {"inlinedResponses": [
                {"response": {"candidates": [{"content": {"parts": [{"text": "ok one"}]}}]}},
                {"error": {"code": 13, "message": "internal"}},
                {"response": {"candidates": [{"content": {"parts": [{"text": "ok three"}]}}]}}
            ]}}
        });
        let job = parse_batch_job("batches/abc", &raw);
        assert!(job.is_terminal());
        assert!(job.succeeded());

        let responses = job.responses.expect("responses");
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].text.as_deref(), Some("ok one"));
        assert!(responses[1].error.is_some());
        assert_eq!(responses[2].text.as_deref(), Some("ok three"));
    }

    #[test]
    fn test_terminal_state_suffix_matching() {
        for state in [
            "JOB_STATE_SUCCEEDED",
            "BATCH_STATE_FAILED",
            "JOB_STATE_CANCELLED",
            "BATCH_STATE_EXPIRED",
        ] {
            let job = BatchJob {
                name: "batches/x".into(),
                state: state.to_string(),
                responses: None,
            };
            assert!(job.is_terminal(), "{} should be terminal", state);
        }
    }
}
