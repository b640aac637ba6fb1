use reqwest::Url;

use crate::config::ClientConfig;
use crate::constants::CLIENT_TOKEN_PARAM;
use crate::error::ClientError;

/// Read the `token` query parameter of the page URL
pub fn client_token_from_url(page_url: &str) -> Result<String, ClientError> {
    let url = Url::parse(page_url).map_err(|_| ClientError::MissingClientToken)?;
    url.query_pairs()
        .find(|(key, _)| key == CLIENT_TOKEN_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
        .ok_or(ClientError::MissingClientToken)
}

/// Explicit token first, then the page URL
pub fn resolve_client_token(config: &ClientConfig) -> Result<String, ClientError> {
    if let Some(token) = config.client_token.as_ref().filter(|t| !t.is_empty()) {
        return Ok(token.clone());
    }
    match config.page_url.as_deref() {
        Some(page_url) => client_token_from_url(page_url),
        None => Err(ClientError::MissingClientToken),
    }
}
