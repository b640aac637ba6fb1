//! Error taxonomy shared by every client component.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No client identity token could be found; the credential manager
    /// downgrades this to the fallback token instead of failing
    #[error("No client token available")]
    MissingClientToken,

    #[error("Credential exchange failed with status {status}: {reason}")]
    CredentialExchangeFailed { status: u16, reason: String },

    #[error("Credential response is missing an access token")]
    MalformedCredentialResponse,

    #[error("Request failed with status {status}: {status_text}")]
    RequestFailed { status: u16, status_text: String },

    #[error("Failed to initialize conversation: {0}")]
    ConversationInit(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token store error: {0}")]
    TokenStore(String),

    #[error("Sync channel error: {0}")]
    SyncChannel(String),

    #[error("Another message exchange is already in flight")]
    ExchangeInFlight,

    #[error("Conversation is not ready")]
    NotReady,

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl ClientError {
    pub(crate) fn request_failed(status: StatusCode) -> Self {
        ClientError::RequestFailed {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
        }
    }

    pub(crate) fn exchange_failed(status: StatusCode) -> Self {
        ClientError::CredentialExchangeFailed {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        }
    }
}
