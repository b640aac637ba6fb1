use std::time::Duration;

use crate::constants::{DEFAULT_API_VERSION, SYNC_CHANNEL_NAME, TOKEN_REFRESH_THRESHOLD};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API server, without the version prefix
    pub api_base_url: String,
    pub api_version: String,
    /// Location the client was opened from; its `token` query parameter
    /// identifies the user on the initial exchange
    pub page_url: Option<String>,
    /// Explicit client token, takes precedence over `page_url`
    pub client_token: Option<String>,
    pub refresh_threshold: Duration,
    pub sync_channel: String,
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            page_url: None,
            client_token: None,
            refresh_threshold: TOKEN_REFRESH_THRESHOLD,
            sync_channel: SYNC_CHANNEL_NAME.to_string(),
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }

    pub fn with_client_token(mut self, token: impl Into<String>) -> Self {
        self.client_token = Some(token.into());
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn with_sync_channel(mut self, name: impl Into<String>) -> Self {
        self.sync_channel = name.into();
        self
    }

    /// Root for versioned API calls, e.g. `https://api.example.com/v1`
    pub fn versioned_base(&self) -> String {
        format!("{}/v{}", self.api_base_url, self.api_version)
    }

    /// The token endpoint lives outside the version prefix
    pub fn token_url(&self) -> String {
        format!("{}/token", self.api_base_url)
    }
}
