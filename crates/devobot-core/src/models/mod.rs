pub mod conversation;
pub mod envelope;
pub mod message;

pub use conversation::{Conversation, OrderBy};
pub use envelope::Envelope;
pub use message::{ChatEntry, Message, MessageState, PartialMessage, ResponseType, Role};
