use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const API_URL_ENV: &str = "STUDIO_API_URL";

/// Client and polling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Base URL of the REST API, without trailing slash
    pub api_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Delay between two status polls
    pub poll_interval_ms: u64,

    /// Poll budget before the client gives up on a job
    pub max_polls: u32,

    /// Pause between a success status and the result fetch
    pub result_delay_ms: u64,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout_secs: Some(60),
            poll_interval_ms: 2000,
            max_polls: 150,
            result_delay_ms: 500,
        }
    }
}

impl StudioConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::default().with_api_url(api_url)
    }

    /// With API endpoint
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// With request timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_result_delay(mut self, delay: Duration) -> Self {
        self.result_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn result_delay(&self) -> Duration {
        Duration::from_millis(self.result_delay_ms)
    }

    /// Rough client-side deadline: `max_polls * poll_interval`.
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval() * self.max_polls
    }

    /// Applies `STUDIO_API_URL` when set and non-empty.
    pub fn apply_env(self) -> Self {
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => self.with_api_url(url),
            _ => self,
        }
    }

    /// `<config dir>/storyboard-studio/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storyboard-studio")
            .join("config.json")
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Load configuration from JSON
    pub fn load(path: &Path) -> Result<Self> {
        let json =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&json).with_context(|| format!("parse {}", path.display()))?;
        let url = config.api_url.clone();
        Ok(config.with_api_url(url))
    }

    /// Loads `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_polling_contract() {
        let config = StudioConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(2000));
        assert_eq!(config.max_polls, 150);
        assert_eq!(config.poll_budget(), Duration::from_secs(300));
        assert_eq!(config.result_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let config = StudioConfig::new("http://studio.local/api/")
            .with_timeout(5)
            .with_max_polls(3);
        assert_eq!(config.api_url, "http://studio.local/api");
        assert_eq!(config.timeout_secs, Some(5));
        assert_eq!(config.max_polls, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("studio-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let config = StudioConfig::new("http://example:9000/api")
            .with_poll_interval(Duration::from_millis(250));
        config.save(&path).unwrap();
        let loaded = StudioConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_trims_trailing_slash() {
        let dir = std::env::temp_dir().join(format!("studio-config-slash-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"api_url": "http://studio.local/api//"}"#).unwrap();
        let loaded = StudioConfig::load(&path).unwrap();
        assert_eq!(loaded.api_url, "http://studio.local/api");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: StudioConfig = serde_json::from_str(r#"{"max_polls": 10}"#).unwrap();
        assert_eq!(config.max_polls, 10);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.poll_interval_ms, 2000);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let path = std::env::temp_dir().join("studio-config-does-not-exist.json");
        let config = StudioConfig::load_or_default(&path).unwrap();
        assert_eq!(config, StudioConfig::default());
    }
}
