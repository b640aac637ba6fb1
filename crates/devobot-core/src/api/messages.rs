use serde_json::json;

use super::backend::ChatApi;
use super::client::ApiRequest;
use crate::error::ClientError;
use crate::models::{Message, OrderBy};
use crate::streaming::stream::envelope_stream;
use crate::streaming::EnvelopeStream;

impl ChatApi {
    /// `GET /conversations/{id}/messages?order_by=...`
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        order: OrderBy,
    ) -> Result<Vec<Message>, ClientError> {
        let request = ApiRequest::get(format!("/conversations/{}/messages", conversation_id))
            .query("order_by", order.as_str());
        self.client().send_json(request).await
    }

    /// `POST /conversations/{id}/messages`; the reply streams back as envelopes
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<EnvelopeStream, ClientError> {
        let request = ApiRequest::post(format!("/conversations/{}/messages", conversation_id))
            .json(json!({ "message": text }));
        let response = self.client().send(request).await?;
        Ok(envelope_stream(response))
    }

    /// `PATCH /conversations/{id}/messages/{message_id}`, same streamed contract
    pub async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<EnvelopeStream, ClientError> {
        let request = ApiRequest::patch(format!(
            "/conversations/{}/messages/{}",
            conversation_id, message_id
        ))
        .json(json!({ "message": text }));
        let response = self.client().send(request).await?;
        Ok(envelope_stream(response))
    }

    /// `DELETE /conversations/{id}/messages/{message_id}`.
    ///
    /// The server removes the message and everything after it.
    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ClientError> {
        let request = ApiRequest::delete(format!(
            "/conversations/{}/messages/{}",
            conversation_id, message_id
        ));
        self.client().send(request).await.map(|_| ())
    }
}
