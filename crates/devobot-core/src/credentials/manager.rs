use std::sync::Arc;

use tracing::{debug, warn};

use super::client_token::resolve_client_token;
use super::credential::{now_millis, Credential};
use super::exchange::{Grant, HttpTokenExchange, TokenExchange};
use super::store::TokenStore;
use crate::config::ClientConfig;
use crate::constants::FALLBACK_CLIENT_TOKEN;
use crate::error::ClientError;

/// Sole gate for the bearer credential used by every request.
///
/// Concurrent callers that hit the refresh threshold together may each run
/// a refresh; the last credential written to the store wins.
pub struct CredentialManager {
    store: Arc<dyn TokenStore>,
    exchange: Arc<dyn TokenExchange>,
    config: ClientConfig,
}

impl CredentialManager {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn TokenStore>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        Self {
            store,
            exchange,
            config,
        }
    }

    /// Manager exchanging tokens over HTTP at the configured token URL
    pub fn with_http(config: ClientConfig, store: Arc<dyn TokenStore>, http: reqwest::Client) -> Self {
        let exchange = Arc::new(HttpTokenExchange::new(http, config.token_url()));
        Self::new(config, store, exchange)
    }

    /// Access token that stays valid for at least the refresh threshold
    pub async fn valid_access_token(&self) -> Result<String, ClientError> {
        let stored = self.store.load()?;

        match stored {
            None => {
                let client_token = self.client_token();
                debug!("No cached credential, exchanging client token");
                let response = self
                    .exchange
                    .exchange(Grant::AuthorizationCode(&client_token))
                    .await?;
                let credential = Credential::issue(response, None, now_millis())?;
                self.store.save(&credential)?;
                Ok(credential.access_token)
            }
            Some(stored) if stored.expires_within(self.config.refresh_threshold, now_millis()) => {
                debug!("Cached credential close to expiry, refreshing");
                let response = self
                    .exchange
                    .exchange(Grant::RefreshToken(&stored.refresh_token))
                    .await?;
                let credential =
                    Credential::issue(response, Some(&stored.refresh_token), now_millis())?;
                self.store.save(&credential)?;
                Ok(credential.access_token)
            }
            Some(stored) => {
                debug!("Using cached credential");
                Ok(stored.access_token)
            }
        }
    }

    fn client_token(&self) -> String {
        match resolve_client_token(&self.config) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Falling back to placeholder client token");
                FALLBACK_CLIENT_TOKEN.to_string()
            }
        }
    }
}
