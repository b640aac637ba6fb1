use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use devobot_core::credentials::{MemoryTokenStore, SessionFileTokenStore, TokenStore};
use devobot_core::sync::{SyncChannel, SyncHub};
use devobot_core::{ApiClient, ChatApi, ClientConfig, ConversationController};

use super::config::CliConfig;

pub type Controller = ConversationController<ChatApi, Box<dyn SyncChannel>>;

/// Credential cache shared by every `devobot` started in this login session
pub fn token_store(config: &CliConfig) -> Arc<dyn TokenStore> {
    match &config.credential_path {
        Some(path) => Arc::new(SessionFileTokenStore::new(path)),
        None => Arc::new(SessionFileTokenStore::in_runtime_dir()),
    }
}

pub fn chat_api(client_config: &ClientConfig, store: Arc<dyn TokenStore>) -> ChatApi {
    ChatApi::new(ApiClient::from_config(client_config.clone(), store))
}

/// Join the named sync channel; falls back to a private channel when the
/// session socket cannot be used
pub async fn sync_channel(name: &str) -> Box<dyn SyncChannel> {
    #[cfg(unix)]
    {
        match devobot_core::sync::SocketSyncChannel::open(name).await {
            Ok(channel) => return Box::new(channel),
            Err(e) => warn!(error = %e, "Sync disabled, other windows will not see updates"),
        }
    }
    #[cfg(not(unix))]
    warn!(channel = name, "Sync disabled on this platform");

    Box::new(SyncHub::new().channel(name))
}

pub async fn open_controller(config: &CliConfig) -> Result<Controller> {
    let client_config = config.client_config()?;
    let api = chat_api(&client_config, token_store(config));
    let channel = sync_channel(&client_config.sync_channel).await;
    Ok(ConversationController::new(api, channel))
}

/// Controller that keeps its credential in memory only
pub fn ephemeral_controller(client_config: &ClientConfig) -> Controller {
    let api = chat_api(client_config, Arc::new(MemoryTokenStore::new()));
    let channel: Box<dyn SyncChannel> = Box::new(SyncHub::new().channel(&client_config.sync_channel));
    ConversationController::new(api, channel)
}
