use super::backend::{ChatApi, PendingDeletion};
use super::client::ApiRequest;
use crate::error::ClientError;
use crate::models::{Conversation, OrderBy};

impl ChatApi {
    /// `POST /conversations`
    pub async fn create_conversation(&self) -> Result<Conversation, ClientError> {
        self.client().send_json(ApiRequest::post("/conversations")).await
    }

    /// `GET /conversations?order_by=...`
    pub async fn list_conversations(&self, order: OrderBy) -> Result<Vec<Conversation>, ClientError> {
        let request = ApiRequest::get("/conversations").query("order_by", order.as_str());
        self.client().send_json(request).await
    }

    /// `DELETE /conversations/{id}`, issued in the background.
    ///
    /// The request is already under way when this returns; await
    /// [`PendingDeletion::wait`] if completion matters.
    pub fn delete_conversation(&self, conversation_id: &str) -> PendingDeletion {
        let client = self.client().clone();
        let request = ApiRequest::delete(format!("/conversations/{}", conversation_id));
        PendingDeletion::spawn(async move { client.send(request).await.map(|_| ()) })
    }
}
