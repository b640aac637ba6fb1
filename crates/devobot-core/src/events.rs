use crate::controller::Phase;
use crate::models::ChatEntry;

/// Notifications a front end renders from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    PhaseChanged(Phase),
    EntryAppended { index: usize, entry: ChatEntry },
    /// An entry's text or state changed in place (streamed reply, confirmed id)
    EntryUpdated { index: usize, entry: ChatEntry },
    EntryRemoved { index: usize },
    /// The whole history was swapped: load, reset, remote clear, edit
    HistoryReplaced {
        conversation_id: String,
        history: Vec<ChatEntry>,
    },
}
