use devobot_core::constants::CHATBOT_NAME;
use devobot_core::models::{ChatEntry, MessageState, Role};

pub fn speaker(role: Role) -> &'static str {
    match role {
        Role::Human => "you",
        Role::Ai => CHATBOT_NAME,
    }
}

/// One history line: `[id] speaker> text`, marking unfinished entries
pub fn format_entry(entry: &ChatEntry) -> String {
    let mut line = String::new();
    if let Some(id) = &entry.id {
        line.push_str(&format!("[{}] ", id));
    }
    line.push_str(speaker(entry.role));
    line.push_str("> ");
    line.push_str(&entry.text);
    match entry.state {
        MessageState::Interrupted => line.push_str(" (interrupted)"),
        MessageState::Pending if entry.role == Role::Ai => line.push_str("..."),
        _ => {}
    }
    line
}

/// Turns cumulative reply snapshots into terminal output
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    shown: String,
}

impl ReplyPrinter {
    /// What to write so the terminal ends up showing `text`.
    ///
    /// Normally only the new suffix; if the reply was rewritten rather than
    /// extended, the whole text again on a fresh line.
    pub fn advance(&mut self, text: &str) -> String {
        let output = match text.strip_prefix(self.shown.as_str()) {
            Some(rest) => rest.to_string(),
            None => format!("\n{}", text),
        };
        self.shown = text.to_string();
        output
    }

    pub fn reset(&mut self) {
        self.shown.clear();
    }

    /// Output for an update of the AI entry, closing the line once it settles
    pub fn render(&mut self, entry: &ChatEntry) -> String {
        let mut output = self.advance(&entry.text);
        match entry.state {
            MessageState::Complete => {
                output.push('\n');
                self.reset();
            }
            MessageState::Interrupted => {
                output.push_str(" (interrupted)\n");
                self.reset();
            }
            _ => {}
        }
        output
    }

    /// Re-sync after updates were dropped, from the latest AI entry in history.
    ///
    /// A settled entry with nothing on screen was already closed out.
    pub fn catch_up(&mut self, latest: Option<&ChatEntry>) -> String {
        match latest {
            Some(entry) => {
                let settled = matches!(entry.state, MessageState::Complete | MessageState::Interrupted);
                if settled && self.shown.is_empty() {
                    String::new()
                } else {
                    self.render(entry)
                }
            }
            None => String::new(),
        }
    }
}
