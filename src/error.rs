//! Error types for the ingestion and enrichment pipeline.
//!
//! Errors are classified by recoverability:
//! - Retryable: network timeouts, 5xx responses, connection resets
//! - NonRetryable: configuration problems (missing API key, unknown vendor,
//!   missing Granicus view_id) - fail fast at construction, never retried
//! - Data errors: malformed vendor payloads - drop the single record, continue

use thiserror::Error;

/// Errors raised by the HTTP session layer.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("rate limited (HTTP 429) by {url} - rate limiter tuning bug")]
    RateLimited { url: String },

    #[error("URL rejected: {0}")]
    UnsafeUrl(String),

    #[error("download exceeds {limit} byte cap: {url}")]
    TooLarge { url: String, limit: usize },
}

impl HttpError {
    /// Retryable errors were already retried inside the session; a surfacing
    /// error means retries are exhausted and the sync attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpError::Request { .. }
                | HttpError::Timeout { .. }
                | HttpError::Status { status: 500..=599, .. }
        )
    }
}

/// Errors raised by the SQLite store.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create data directory: {0}")]
    CreateDir(std::io::Error),

    #[error("could not determine home directory")]
    HomeDirNotFound,

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

/// Errors raised while constructing or running a vendor adapter.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("unexpected payload from {vendor}: {detail}")]
    BadPayload { vendor: &'static str, detail: String },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Errors raised by the document processing path.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("no packet_url provided")]
    NoPacketUrl,

    #[error("document requires premium tier for processing: {0}")]
    RequiresPremiumTier(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("summarization failed: {0}")]
    Summarizer(String),

    #[error("meeting not found: {0}")]
    MeetingNotFound(String),
}

/// Errors raised during PDF text extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("PDF extraction panicked (malformed file)")]
    Panicked,

    #[error("extracted text failed quality checks: {0}")]
    PoorQuality(String),

    #[error("empty document")]
    Empty,
}

/// Errors raised by the LLM summarizer layer.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("prompt not found: {category}.{name}")]
    PromptNotFound { category: String, name: String },

    #[error("missing template variable {variable} for prompt {category}.{name}")]
    MissingVariable {
        category: String,
        name: String,
        variable: String,
    },

    #[error("model returned no text")]
    EmptyResponse,

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("batch job {name} ended in state {state}")]
    BatchFailed { name: String, state: String },

    #[error("batch job timed out after {0} seconds")]
    BatchTimeout(u64),

    #[error("invalid response payload: {0}")]
    BadResponse(String),
}
