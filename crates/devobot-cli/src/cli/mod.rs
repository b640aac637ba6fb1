pub mod config;
pub mod render;
pub mod session;

pub use config::CliConfig;
pub use render::{format_entry, ReplyPrinter};
pub use session::{open_controller, token_store, Controller};
