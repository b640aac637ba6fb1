use serde::{Deserialize, Serialize};

use super::message::PartialMessage;

/// One decoded unit of a streamed send/edit response.
///
/// `ai.text` is the full text generated so far, not a delta: each envelope
/// replaces the displayed reply rather than extending it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human: Option<PartialMessage>,
    #[serde(default)]
    pub ai: PartialMessage,
}

impl Envelope {
    /// Cumulative AI text carried by this envelope
    pub fn ai_text(&self) -> &str {
        self.ai.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_envelope_with_only_ai_text() {
        let envelope: Envelope = serde_json::from_str(r#"{"ai":{"text":"H"}}"#).unwrap();
        assert_eq!(envelope.ai_text(), "H");
        assert!(envelope.human.is_none());
    }

    #[test]
    fn test_full_envelope() {
        let json = r#"{
            "human": {"id": "h1", "role": "human", "text": "hello", "conversation_id": "c1"},
            "ai": {"id": "a1", "role": "ai", "text": "Hello", "response_type": "full"}
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.human.as_ref().unwrap().id.as_deref(), Some("h1"));
        assert_eq!(envelope.ai.role, Some(Role::Ai));
        assert_eq!(envelope.ai_text(), "Hello");
    }
}
