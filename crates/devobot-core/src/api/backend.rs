use std::future::Future;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::client::ApiClient;
use crate::error::ClientError;
use crate::models::{Conversation, Message, OrderBy};
use crate::streaming::EnvelopeStream;

/// Typed conversation/message operations the controller depends on
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    async fn create_conversation(&self) -> Result<Conversation, ClientError>;

    async fn list_conversations(&self, order: OrderBy) -> Result<Vec<Conversation>, ClientError>;

    /// Start deleting a conversation without waiting for it
    fn delete_conversation(&self, conversation_id: &str) -> PendingDeletion;

    async fn list_messages(
        &self,
        conversation_id: &str,
        order: OrderBy,
    ) -> Result<Vec<Message>, ClientError>;

    async fn send_message(&self, conversation_id: &str, text: &str)
        -> Result<EnvelopeStream, ClientError>;

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<EnvelopeStream, ClientError>;

    async fn delete_message(&self, conversation_id: &str, message_id: &str)
        -> Result<(), ClientError>;
}

/// Handle on a deletion running in the background
pub struct PendingDeletion {
    handle: JoinHandle<Result<(), ClientError>>,
}

impl PendingDeletion {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Wait for the server to acknowledge the deletion
    pub async fn wait(self) -> Result<(), ClientError> {
        self.handle
            .await
            .map_err(|err| ClientError::Task(err.to_string()))?
    }
}

/// HTTP implementation of [`ChatBackend`]
#[derive(Clone)]
pub struct ChatApi {
    client: ApiClient,
}

impl ChatApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

#[async_trait]
impl ChatBackend for ChatApi {
    async fn create_conversation(&self) -> Result<Conversation, ClientError> {
        ChatApi::create_conversation(self).await
    }

    async fn list_conversations(&self, order: OrderBy) -> Result<Vec<Conversation>, ClientError> {
        ChatApi::list_conversations(self, order).await
    }

    fn delete_conversation(&self, conversation_id: &str) -> PendingDeletion {
        ChatApi::delete_conversation(self, conversation_id)
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        order: OrderBy,
    ) -> Result<Vec<Message>, ClientError> {
        ChatApi::list_messages(self, conversation_id, order).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<EnvelopeStream, ClientError> {
        ChatApi::send_message(self, conversation_id, text).await
    }

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<EnvelopeStream, ClientError> {
        ChatApi::edit_message(self, conversation_id, message_id, text).await
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ClientError> {
        ChatApi::delete_message(self, conversation_id, message_id).await
    }
}
