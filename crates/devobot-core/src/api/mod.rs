pub mod backend;
pub mod client;
pub mod conversations;
pub mod messages;

pub use backend::{ChatApi, ChatBackend, PendingDeletion};
pub use client::{ApiClient, ApiRequest};
