use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use devobot_core::ClientConfig;

pub const ENV_API_BASE_URL: &str = "DEVOBOT_API_BASE_URL";
pub const ENV_API_VERSION: &str = "DEVOBOT_API_VERSION";
pub const ENV_PAGE_URL: &str = "DEVOBOT_PAGE_URL";
pub const ENV_TOKEN: &str = "DEVOBOT_TOKEN";

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Page the widget would be embedded in; its `token` query parameter
    /// identifies the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,

    /// Client token, used instead of reading one from `pageUrl`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_channel: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_threshold_secs: Option<u64>,

    /// Where the session credential is cached (defaults to the runtime dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_path: Option<PathBuf>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// `~/.config/devobot/config.json`, if it exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("devobot").join("config.json"))
            .filter(|path| path.exists())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    /// Fill fields left unset from the process environment
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());
        if self.api_base_url.is_none() {
            self.api_base_url = lookup(ENV_API_BASE_URL);
        }
        if self.api_version.is_none() {
            self.api_version = lookup(ENV_API_VERSION);
        }
        if self.page_url.is_none() {
            self.page_url = lookup(ENV_PAGE_URL);
        }
        if self.token.is_none() {
            self.token = lookup(ENV_TOKEN);
        }
        self
    }

    /// Values set in `overrides` win
    pub fn merge(self, overrides: CliConfig) -> Self {
        Self {
            api_base_url: overrides.api_base_url.or(self.api_base_url),
            api_version: overrides.api_version.or(self.api_version),
            page_url: overrides.page_url.or(self.page_url),
            token: overrides.token.or(self.token),
            sync_channel: overrides.sync_channel.or(self.sync_channel),
            refresh_threshold_secs: overrides.refresh_threshold_secs.or(self.refresh_threshold_secs),
            credential_path: overrides.credential_path.or(self.credential_path),
        }
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        let base_url = self.api_base_url.as_deref().context(
            "No API base URL configured (set apiBaseUrl, DEVOBOT_API_BASE_URL or --api-base-url)",
        )?;

        let mut config = ClientConfig::new(base_url);
        if let Some(version) = &self.api_version {
            config = config.with_api_version(version.trim_start_matches('v'));
        }
        if let Some(page_url) = &self.page_url {
            config = config.with_page_url(page_url);
        }
        if let Some(token) = &self.token {
            config = config.with_client_token(token);
        }
        if let Some(channel) = &self.sync_channel {
            config = config.with_sync_channel(channel);
        }
        if let Some(secs) = self.refresh_threshold_secs {
            config = config.with_refresh_threshold(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "apiBaseUrl": "https://api.example.com",
            "apiVersion": "2",
            "pageUrl": "https://shop.example.com/?token=abc",
            "syncChannel": "support",
            "refreshThresholdSecs": 30
        }"#;
        let config = CliConfig::from_json(json).unwrap();
        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.refresh_threshold_secs, Some(30));
        assert!(config.token.is_none());

        let client = config.client_config().unwrap();
        assert_eq!(client.versioned_base(), "https://api.example.com/v2");
        assert_eq!(client.sync_channel, "support");
        assert_eq!(client.refresh_threshold, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_config_minimal() {
        let config: CliConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CliConfig::default());
        assert!(config.client_config().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"apiBaseUrl": "http://localhost:8000", "token": "t"}"#).unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.token.as_deref(), Some("t"));
        assert!(CliConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_env_fills_only_unset_fields() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_BASE_URL, "http://from-env"),
            (ENV_TOKEN, "env-token"),
            (ENV_PAGE_URL, ""),
        ]);
        let config = CliConfig {
            api_base_url: Some("http://from-file".to_string()),
            ..Default::default()
        }
        .with_env_from(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.api_base_url.as_deref(), Some("http://from-file"));
        assert_eq!(config.token.as_deref(), Some("env-token"));
        assert!(config.page_url.is_none());
    }

    #[test]
    fn test_overrides_win() {
        let file = CliConfig {
            api_base_url: Some("http://from-file".to_string()),
            api_version: Some("1".to_string()),
            ..Default::default()
        };
        let flags = CliConfig {
            api_version: Some("v3".to_string()),
            ..Default::default()
        };

        let merged = file.merge(flags);
        assert_eq!(merged.api_base_url.as_deref(), Some("http://from-file"));
        assert_eq!(
            merged.client_config().unwrap().versioned_base(),
            "http://from-file/v3"
        );
    }
}
