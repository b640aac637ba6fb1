pub mod api;
pub mod config;
pub mod constants;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod events;
pub mod models;
pub mod streaming;
pub mod sync;

// Re-export the types a front end needs at crate root for convenience
pub use api::{ApiClient, ChatApi, ChatBackend, PendingDeletion};
pub use config::ClientConfig;
pub use controller::{ConversationController, Phase};
pub use credentials::CredentialManager;
pub use error::ClientError;
pub use events::ControllerEvent;
pub use sync::{SyncChannel, SyncEvent};
