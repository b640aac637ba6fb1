use async_trait::async_trait;

use super::credential::OAuthToken;
use crate::constants::grants;
use crate::error::ClientError;

/// Grant presented to the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant<'a> {
    /// Initial exchange of the client identity token
    AuthorizationCode(&'a str),
    RefreshToken(&'a str),
}

impl Grant<'_> {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode(_) => grants::AUTHORIZATION_CODE,
            Grant::RefreshToken(_) => grants::REFRESH_TOKEN,
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Grant::AuthorizationCode(token) | Grant::RefreshToken(token) => token,
        }
    }
}

#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, grant: Grant<'_>) -> Result<OAuthToken, ClientError>;
}

/// Form-encoded `POST /token`
pub struct HttpTokenExchange {
    http: reqwest::Client,
    token_url: String,
}

impl HttpTokenExchange {
    pub fn new(http: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            http,
            token_url: token_url.into(),
        }
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange(&self, grant: Grant<'_>) -> Result<OAuthToken, ClientError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[("token", grant.token()), ("grant_type", grant.grant_type())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::exchange_failed(status));
        }

        Ok(response.json::<OAuthToken>().await?)
    }
}
