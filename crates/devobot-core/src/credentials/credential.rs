use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Current Unix time in milliseconds
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Body returned by `POST /token` for both grant types
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// The cached bearer credential, persisted as one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry, Unix milliseconds
    pub access_token_expiry: u64,
}

impl Credential {
    /// Build a credential from a token response received at `issued_at`.
    ///
    /// Expiry is always issuance time plus the advertised lifetime. A refresh
    /// response without a refresh token keeps `previous_refresh_token`.
    pub fn issue(
        token: OAuthToken,
        previous_refresh_token: Option<&str>,
        issued_at: u64,
    ) -> Result<Self, ClientError> {
        if token.access_token.is_empty() {
            return Err(ClientError::MalformedCredentialResponse);
        }

        let refresh_token = match token.refresh_token.filter(|t| !t.is_empty()) {
            Some(refresh_token) => refresh_token,
            None => previous_refresh_token
                .map(str::to_string)
                .ok_or(ClientError::MalformedCredentialResponse)?,
        };

        Ok(Self {
            access_token: token.access_token,
            refresh_token,
            access_token_expiry: issued_at.saturating_add(token.expires_in.saturating_mul(1000)),
        })
    }

    /// True when less than `threshold` remains before expiry (or it already passed)
    pub fn expires_within(&self, threshold: Duration, now: u64) -> bool {
        let remaining = self.access_token_expiry.saturating_sub(now);
        u128::from(remaining) < threshold.as_millis()
    }
}
