use serde::{Deserialize, Serialize};

use crate::models::PartialMessage;

/// Wire format: `{"type": "new-message" | "clear-history", "conversationId", "payload"?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    #[serde(rename_all = "camelCase")]
    NewMessage {
        conversation_id: String,
        #[serde(default)]
        payload: PartialMessage,
    },
    #[serde(rename_all = "camelCase")]
    ClearHistory { conversation_id: String },
}

impl SyncEvent {
    pub fn new_message(conversation_id: impl Into<String>, payload: PartialMessage) -> Self {
        SyncEvent::NewMessage {
            conversation_id: conversation_id.into(),
            payload,
        }
    }

    pub fn clear_history(conversation_id: impl Into<String>) -> Self {
        SyncEvent::ClearHistory {
            conversation_id: conversation_id.into(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            SyncEvent::NewMessage {
                conversation_id, ..
            }
            | SyncEvent::ClearHistory { conversation_id } => conversation_id,
        }
    }

    /// Whether the event is about the given conversation
    pub fn concerns(&self, conversation_id: &str) -> bool {
        self.conversation_id() == conversation_id
    }
}

/// An event tagged with the endpoint that published it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFrame {
    pub origin: String,
    pub event: SyncEvent,
}
