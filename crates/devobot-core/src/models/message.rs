use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

/// Marker the server attaches to streamed messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Partial,
    Full,
}

/// A stored message as returned by `GET /conversations/{id}/messages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub role: Role,
    pub text: String,
    pub created_at: String,
}

/// Message with any subset of fields present.
///
/// Streamed envelopes and cross-instance sync payloads only guarantee the
/// fields they need (usually `role` and `text`), so everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
}

impl PartialMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role: Some(role),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

impl From<Message> for PartialMessage {
    fn from(message: Message) -> Self {
        Self {
            id: Some(message.id),
            conversation_id: Some(message.conversation_id),
            user_id: Some(message.user_id),
            role: Some(message.role),
            text: Some(message.text),
            created_at: Some(message.created_at),
            response_type: None,
        }
    }
}

/// Lifecycle of an entry in the local chat history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Optimistically shown, or an AI reply with no text received yet
    Pending,
    /// AI reply receiving streamed text
    Streaming,
    Complete,
    /// Stream broke off before completion; holds the text received so far
    Interrupted,
}

/// One entry of the in-memory chat history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub id: Option<String>,
    pub role: Role,
    pub text: String,
    pub created_at: Option<String>,
    pub state: MessageState,
}

impl ChatEntry {
    pub fn pending_human(text: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::Human,
            text: text.into(),
            created_at: None,
            state: MessageState::Pending,
        }
    }

    /// Placeholder shown until the first streamed fragment arrives
    pub fn ai_placeholder() -> Self {
        Self {
            id: None,
            role: Role::Ai,
            text: String::new(),
            created_at: None,
            state: MessageState::Pending,
        }
    }

    /// Build a completed entry from a partial message; `None` without a role
    pub fn from_partial(message: &PartialMessage) -> Option<Self> {
        Some(Self {
            id: message.id.clone(),
            role: message.role?,
            text: message.text().to_string(),
            created_at: message.created_at.clone(),
            state: MessageState::Complete,
        })
    }

    pub fn is_placeholder(&self) -> bool {
        self.role == Role::Ai && self.state == MessageState::Pending
    }

    pub fn to_partial(&self, conversation_id: &str) -> PartialMessage {
        PartialMessage {
            id: self.id.clone(),
            conversation_id: Some(conversation_id.to_string()),
            user_id: None,
            role: Some(self.role),
            text: Some(self.text.clone()),
            created_at: self.created_at.clone(),
            response_type: None,
        }
    }
}

impl From<Message> for ChatEntry {
    fn from(message: Message) -> Self {
        Self {
            id: Some(message.id),
            role: message.role,
            text: message.text,
            created_at: Some(message.created_at),
            state: MessageState::Complete,
        }
    }
}
