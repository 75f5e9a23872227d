//! Environment-driven configuration, resolved once at startup.
//!
//! The database and static asset files live under the data directory
//! (`~/.munisync` by default, `MUNISYNC_DATA_DIR` to override). The LLM key
//! is required for the processing loop; sync-only invocations can run
//! without it.

use std::path::PathBuf;

use crate::error::SyncError;

/// Frozen runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key. Required for summarization, optional for sync-only runs.
    pub llm_api_key: Option<String>,
    /// Legistar API token for NYC (their instance requires one).
    pub nyc_legistar_token: Option<String>,
    /// Directory holding the database and static config files.
    pub data_dir: PathBuf,
    /// Whether item-level work is submitted through the batch API.
    pub batch_enabled: bool,
}

impl Config {
    /// Resolve configuration from the environment.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("MUNISYNC_DATA_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".munisync")))
            .unwrap_or_else(|| PathBuf::from("."));

        let llm_api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        let nyc_legistar_token = std::env::var("NYC_LEGISTAR_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let batch_enabled = std::env::var("MUNISYNC_BATCH_DISABLED")
            .map(|v| v != "1" && v.to_lowercase() != "true")
            .unwrap_or(true);

        Config {
            llm_api_key,
            nyc_legistar_token,
            data_dir,
            batch_enabled,
        }
    }

    /// Path to the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("munisync.db")
    }

    /// Path to the Granicus view_id mapping file.
    pub fn granicus_view_ids_path(&self) -> PathBuf {
        self.data_dir.join("granicus_view_ids.json")
    }

    /// The API key, or a configuration error for paths that require it.
    pub fn require_api_key(&self) -> Result<&str, SyncError> {
        self.llm_api_key.as_deref().ok_or_else(|| {
            SyncError::Configuration(
                "API key required - set LLM_API_KEY or GEMINI_API_KEY".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            llm_api_key: None,
            nyc_legistar_token: None,
            data_dir: PathBuf::from("/tmp/munisync-test"),
            batch_enabled: true,
        }
    }

    #[test]
    fn test_db_path_under_data_dir() {
        let config = test_config();
        assert_eq!(
            config.db_path(),
            PathBuf::from("/tmp/munisync-test/munisync.db")
        );
    }

    #[test]
    fn test_require_api_key_missing() {
        let config = test_config();
        assert!(config.require_api_key().is_err());
    }

    #[test]
    fn test_require_api_key_present() {
        let mut config = test_config();
        config.llm_api_key = Some("key-123".to_string());
        assert_eq!(config.require_api_key().unwrap(), "key-123");
    }
}
