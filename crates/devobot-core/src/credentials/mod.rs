//! Bearer credential lifecycle: obtain, cache, refresh.

pub mod client_token;
pub mod credential;
pub mod exchange;
pub mod manager;
pub mod store;

pub use client_token::{client_token_from_url, resolve_client_token};
pub use credential::{Credential, OAuthToken};
pub use exchange::{Grant, HttpTokenExchange, TokenExchange};
pub use manager::CredentialManager;
pub use store::{MemoryTokenStore, SessionFileTokenStore, TokenStore};
