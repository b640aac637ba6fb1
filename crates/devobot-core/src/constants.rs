//! Application-wide constants
//!
//! Centralized location for magic strings and configuration values
//! that are used across multiple modules.

use std::time::Duration;

/// Refresh the access token when less than this is left before expiry
pub const TOKEN_REFRESH_THRESHOLD: Duration = Duration::from_secs(2 * 60);

/// Value sent as the client token when the page URL carries none
pub const FALLBACK_CLIENT_TOKEN: &str = "token";

/// Query parameter holding the client identity token
pub const CLIENT_TOKEN_PARAM: &str = "token";

/// Name of the channel shared by every running instance
pub const SYNC_CHANNEL_NAME: &str = "chat-sync";

/// Display name of the assistant
pub const CHATBOT_NAME: &str = "Devobot";

/// Default API version prefix (requests go to `/v{version}/...`)
pub const DEFAULT_API_VERSION: &str = "1";

// Grant types accepted by the token endpoint
pub mod grants {
    /// Initial exchange of the client token
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    /// Exchange of a refresh token for a new access token
    pub const REFRESH_TOKEN: &str = "refresh_token";
}
