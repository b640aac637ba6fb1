//! Conversation state: the active conversation, its in-memory history, and
//! how streamed replies and events from other instances update it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::api::{ChatBackend, PendingDeletion};
use crate::error::ClientError;
use crate::events::ControllerEvent;
use crate::models::{ChatEntry, Envelope, MessageState, OrderBy, PartialMessage, Role};
use crate::streaming::EnvelopeStream;
use crate::sync::{Subscription, SyncChannel, SyncEvent, SyncHandler};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    /// Initialization failed; carries a human-readable reason
    Error(String),
}

#[derive(Default)]
struct State {
    phase: Phase,
    conversation_id: Option<String>,
    history: Vec<ChatEntry>,
}

struct Loaded {
    conversation_id: String,
    history: Vec<ChatEntry>,
    created: bool,
}

struct Inner<B, C> {
    backend: B,
    channel: C,
    state: Mutex<State>,
    events: broadcast::Sender<ControllerEvent>,
    initialized: AtomicBool,
    in_flight: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
}

/// Owns one conversation and keeps it in step with the server and with
/// other instances on the same sync channel.
///
/// At most one message exchange (submit, edit, reset) runs at a time.
pub struct ConversationController<B, C> {
    inner: Arc<Inner<B, C>>,
}

impl<B, C> Clone for ConversationController<B, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Holds the single exchange slot; released on drop, including when the
/// owning future is abandoned mid-stream
struct ExchangeGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ExchangeGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ClientError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClientError::ExchangeInFlight)?;
        Ok(Self { flag })
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl<B: ChatBackend, C: SyncChannel> ConversationController<B, C> {
    pub fn new(backend: B, channel: C) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                channel,
                state: Mutex::new(State::default()),
                events,
                initialized: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase.clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.inner.state.lock().conversation_id.clone()
    }

    pub fn history(&self) -> Vec<ChatEntry> {
        self.inner.state.lock().history.clone()
    }

    /// True while a submission is streaming; front ends disable input meanwhile
    pub fn is_exchange_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Load the most recent conversation with its messages, or create a new
    /// conversation when none exists.
    ///
    /// Runs once per controller; repeated calls return `Ok(())` without doing
    /// anything. A failure leaves the controller in [`Phase::Error`] for good.
    pub async fn initialize(&self) -> Result<(), ClientError> {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            debug!("Conversation already initialized");
            return Ok(());
        }

        self.attach_sync();
        self.inner.set_phase(Phase::Loading);

        match self.load_or_create().await {
            Ok(loaded) => {
                self.inner
                    .replace_history(loaded.conversation_id.clone(), loaded.history);
                self.inner.set_phase(Phase::Ready);
                if loaded.created {
                    self.inner
                        .publish(SyncEvent::clear_history(loaded.conversation_id));
                }
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Failed to initialize conversation");
                let message = err.to_string();
                self.inner.set_phase(Phase::Error(message.clone()));
                Err(ClientError::ConversationInit(message))
            }
        }
    }

    async fn load_or_create(&self) -> Result<Loaded, ClientError> {
        let backend = &self.inner.backend;
        let conversations = backend.list_conversations(OrderBy::Desc).await?;

        match conversations.into_iter().next() {
            Some(latest) => {
                let messages = backend.list_messages(&latest.id, OrderBy::Asc).await?;
                debug!(conversation = %latest.id, messages = messages.len(), "Loaded conversation");
                Ok(Loaded {
                    conversation_id: latest.id,
                    history: messages.into_iter().map(ChatEntry::from).collect(),
                    created: false,
                })
            }
            None => {
                let conversation = backend.create_conversation().await?;
                debug!(conversation = %conversation.id, "Created conversation");
                Ok(Loaded {
                    conversation_id: conversation.id,
                    history: Vec::new(),
                    created: true,
                })
            }
        }
    }

    fn attach_sync(&self) {
        let inner: Weak<Inner<B, C>> = Arc::downgrade(&self.inner);
        let handler: SyncHandler = Box::new(move |event: SyncEvent| {
            if let Some(inner) = inner.upgrade() {
                inner.apply_sync_event(event);
            }
        });

        let subscription = self.inner.channel.subscribe(handler);
        *self.inner.subscription.lock() = Some(subscription);
    }

    /// Send a message and stream the reply into history.
    ///
    /// Returns the completed reply, or `None` for blank input.
    pub async fn submit(&self, text: &str) -> Result<Option<ChatEntry>, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let conversation_id = self.inner.ready_conversation()?;
        let _guard = ExchangeGuard::acquire(&self.inner.in_flight)?;

        let human = ChatEntry::pending_human(text);
        let human_index = self.inner.append(human.clone());
        self.inner
            .publish(SyncEvent::new_message(&conversation_id, human.to_partial(&conversation_id)));
        let ai_index = self.inner.append(ChatEntry::ai_placeholder());

        let stream = match self.inner.backend.send_message(&conversation_id, text).await {
            Ok(stream) => stream,
            Err(err) => {
                self.inner.remove_placeholder(ai_index);
                return Err(err);
            }
        };

        self.stream_reply(&conversation_id, human_index, ai_index, stream)
            .await
            .map(Some)
    }

    /// Replace a sent message with new text and stream a fresh reply.
    ///
    /// The server drops the message and everything after it, so local history
    /// is cut at the same point before the new text is appended.
    pub async fn edit(&self, message_id: &str, text: &str) -> Result<Option<ChatEntry>, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let conversation_id = self.inner.ready_conversation()?;
        let _guard = ExchangeGuard::acquire(&self.inner.in_flight)?;

        self.inner.truncate_at(&conversation_id, message_id)?;
        let human_index = self.inner.append(ChatEntry::pending_human(text));
        self.inner.resync_peers(&conversation_id);
        let ai_index = self.inner.append(ChatEntry::ai_placeholder());

        let stream = match self
            .inner
            .backend
            .edit_message(&conversation_id, message_id, text)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                self.inner.remove_placeholder(ai_index);
                return Err(err);
            }
        };

        self.stream_reply(&conversation_id, human_index, ai_index, stream)
            .await
            .map(Some)
    }

    /// Delete a message and everything after it
    pub async fn delete_from(&self, message_id: &str) -> Result<(), ClientError> {
        let conversation_id = self.inner.ready_conversation()?;
        let _guard = ExchangeGuard::acquire(&self.inner.in_flight)?;

        if !self.inner.contains_message(message_id) {
            return Err(ClientError::MessageNotFound(message_id.to_string()));
        }
        self.inner
            .backend
            .delete_message(&conversation_id, message_id)
            .await?;
        self.inner.truncate_at(&conversation_id, message_id)?;
        self.inner.resync_peers(&conversation_id);
        Ok(())
    }

    /// Drop the active conversation and start an empty one.
    ///
    /// The old conversation's deletion is not awaited; the returned handle
    /// resolves once the server has acknowledged it.
    pub async fn reset(&self) -> Result<PendingDeletion, ClientError> {
        let previous = self.inner.ready_conversation()?;
        let _guard = ExchangeGuard::acquire(&self.inner.in_flight)?;

        let deletion = self.inner.backend.delete_conversation(&previous);
        let conversation = self.inner.backend.create_conversation().await?;
        debug!(previous = %previous, conversation = %conversation.id, "Reset conversation");

        self.inner
            .replace_history(conversation.id.clone(), Vec::new());
        self.inner
            .publish(SyncEvent::clear_history(conversation.id));
        Ok(deletion)
    }

    async fn stream_reply(
        &self,
        conversation_id: &str,
        human_index: usize,
        ai_index: usize,
        mut stream: EnvelopeStream,
    ) -> Result<ChatEntry, ClientError> {
        let mut reply = ChatEntry::ai_placeholder();

        while let Some(item) = stream.next().await {
            match item {
                Ok(envelope) => {
                    if let Some(human) = &envelope.human {
                        self.inner.confirm_human(human_index, human);
                    }
                    apply_envelope(&mut reply, &envelope);
                    self.inner.update_reply(ai_index, &reply);
                }
                Err(err) => {
                    warn!(error = %err, "Reply stream interrupted");
                    reply.state = MessageState::Interrupted;
                    self.inner.update_reply(ai_index, &reply);
                    return Err(err);
                }
            }
        }

        reply.state = MessageState::Complete;
        self.inner.update_reply(ai_index, &reply);
        self.inner
            .publish(SyncEvent::new_message(conversation_id, reply.to_partial(conversation_id)));
        Ok(reply)
    }
}

/// Each envelope carries the full reply so far; it replaces the text
fn apply_envelope(reply: &mut ChatEntry, envelope: &Envelope) {
    reply.text = envelope.ai_text().to_string();
    reply.state = MessageState::Streaming;
    if envelope.ai.id.is_some() {
        reply.id = envelope.ai.id.clone();
    }
    if envelope.ai.created_at.is_some() {
        reply.created_at = envelope.ai.created_at.clone();
    }
}

impl<B: ChatBackend, C: SyncChannel> Inner<B, C> {
    fn emit(&self, event: ControllerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: Phase) {
        self.state.lock().phase = phase.clone();
        self.emit(ControllerEvent::PhaseChanged(phase));
    }

    fn publish(&self, event: SyncEvent) {
        if let Err(err) = self.channel.publish(event) {
            warn!(error = %err, "Failed to publish sync event");
        }
    }

    fn ready_conversation(&self) -> Result<String, ClientError> {
        let state = self.state.lock();
        match (&state.phase, &state.conversation_id) {
            (Phase::Ready, Some(id)) => Ok(id.clone()),
            _ => Err(ClientError::NotReady),
        }
    }

    fn append(&self, entry: ChatEntry) -> usize {
        let mut state = self.state.lock();
        state.history.push(entry.clone());
        let index = state.history.len() - 1;
        self.emit(ControllerEvent::EntryAppended { index, entry });
        index
    }

    fn replace_history(&self, conversation_id: String, history: Vec<ChatEntry>) {
        let mut state = self.state.lock();
        state.conversation_id = Some(conversation_id.clone());
        state.history = history.clone();
        self.emit(ControllerEvent::HistoryReplaced {
            conversation_id,
            history,
        });
    }

    fn contains_message(&self, message_id: &str) -> bool {
        self.state
            .lock()
            .history
            .iter()
            .any(|entry| entry.id.as_deref() == Some(message_id))
    }

    /// Cut history just before the given message
    fn truncate_at(&self, conversation_id: &str, message_id: &str) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        let position = state
            .history
            .iter()
            .position(|entry| entry.id.as_deref() == Some(message_id))
            .ok_or_else(|| ClientError::MessageNotFound(message_id.to_string()))?;

        state.history.truncate(position);
        self.emit(ControllerEvent::HistoryReplaced {
            conversation_id: conversation_id.to_string(),
            history: state.history.clone(),
        });
        Ok(())
    }

    /// Peers only understand append and clear, so a truncated history is sent
    /// as a clear followed by every remaining entry
    fn resync_peers(&self, conversation_id: &str) {
        let history = self.state.lock().history.clone();
        self.publish(SyncEvent::clear_history(conversation_id));
        for entry in &history {
            self.publish(SyncEvent::new_message(conversation_id, entry.to_partial(conversation_id)));
        }
    }

    fn remove_placeholder(&self, index: usize) {
        let mut state = self.state.lock();
        if state.history.get(index).is_some_and(ChatEntry::is_placeholder) {
            state.history.remove(index);
            self.emit(ControllerEvent::EntryRemoved { index });
        }
    }

    /// Adopt the server's id for the optimistically appended message
    fn confirm_human(&self, index: usize, human: &PartialMessage) {
        let mut state = self.state.lock();
        let Some(entry) = state.history.get_mut(index) else {
            return;
        };
        if entry.role != Role::Human || entry.state != MessageState::Pending {
            return;
        }

        if human.id.is_some() {
            entry.id = human.id.clone();
        }
        if human.created_at.is_some() {
            entry.created_at = human.created_at.clone();
        }
        entry.state = MessageState::Complete;
        let entry = entry.clone();
        self.emit(ControllerEvent::EntryUpdated { index, entry });
    }

    fn update_reply(&self, index: usize, reply: &ChatEntry) {
        let mut state = self.state.lock();
        match state.history.get_mut(index) {
            Some(entry)
                if entry.role == Role::Ai
                    && matches!(entry.state, MessageState::Pending | MessageState::Streaming) =>
            {
                *entry = reply.clone();
                self.emit(ControllerEvent::EntryUpdated {
                    index,
                    entry: reply.clone(),
                });
            }
            _ => debug!(index, "Reply slot gone, history was replaced meanwhile"),
        }
    }

    fn apply_sync_event(&self, event: SyncEvent) {
        let mut state = self.state.lock();
        let Some(current) = state.conversation_id.clone() else {
            return;
        };
        if !event.concerns(&current) {
            debug!(conversation = %event.conversation_id(), "Ignoring sync event for another conversation");
            return;
        }

        match event {
            SyncEvent::NewMessage { payload, .. } => match ChatEntry::from_partial(&payload) {
                Some(entry) => {
                    state.history.push(entry.clone());
                    let index = state.history.len() - 1;
                    self.emit(ControllerEvent::EntryAppended { index, entry });
                }
                None => warn!("Ignoring synced message without a role"),
            },
            SyncEvent::ClearHistory { conversation_id } => {
                state.history.clear();
                self.emit(ControllerEvent::HistoryReplaced {
                    conversation_id,
                    history: Vec::new(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, Message};
    use crate::sync::{BroadcastSyncChannel, SyncHub};
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    enum Reply {
        Envelopes(Vec<Envelope>),
        FailAfter(Vec<Envelope>),
        Refuse,
        Channel(mpsc::UnboundedReceiver<Envelope>),
    }

    #[derive(Default)]
    struct FakeBackend {
        fail_listing: bool,
        conversations: Mutex<Vec<Conversation>>,
        messages: Mutex<HashMap<String, Vec<Message>>>,
        replies: Mutex<VecDeque<Reply>>,
        created: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        edits: Mutex<Vec<(String, String, String)>>,
        deleted_messages: Mutex<Vec<(String, String)>>,
    }

    impl FakeBackend {
        fn with_reply(self, reply: Reply) -> Self {
            self.replies.lock().push_back(reply);
            self
        }

        fn next_reply(&self) -> Result<EnvelopeStream, ClientError> {
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(Reply::Envelopes(envelopes)) => {
                    Ok(stream::iter(envelopes.into_iter().map(Ok::<_, ClientError>)).boxed())
                }
                Some(Reply::FailAfter(envelopes)) => {
                    let items = envelopes
                        .into_iter()
                        .map(Ok::<_, ClientError>)
                        .chain(std::iter::once(Err(ClientError::Task("connection reset".to_string()))));
                    Ok(stream::iter(items).boxed())
                }
                Some(Reply::Channel(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|envelope| (Ok::<_, ClientError>(envelope), rx))
                })
                .boxed()),
                Some(Reply::Refuse) | None => Err(ClientError::RequestFailed {
                    status: 500,
                    status_text: "Internal Server Error".to_string(),
                }),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn create_conversation(&self) -> Result<Conversation, ClientError> {
            let mut created = self.created.lock();
            let id = format!("conv-{}", created.len() + 1);
            created.push(id.clone());
            let conversation = conversation(&id, "2030-01-01T00:00:00Z");
            self.conversations.lock().push(conversation.clone());
            Ok(conversation)
        }

        async fn list_conversations(&self, order: OrderBy) -> Result<Vec<Conversation>, ClientError> {
            if self.fail_listing {
                return Err(ClientError::RequestFailed {
                    status: 401,
                    status_text: "Unauthorized".to_string(),
                });
            }
            let mut conversations = self.conversations.lock().clone();
            conversations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            if order == OrderBy::Desc {
                conversations.reverse();
            }
            Ok(conversations)
        }

        fn delete_conversation(&self, conversation_id: &str) -> PendingDeletion {
            self.deleted.lock().push(conversation_id.to_string());
            PendingDeletion::spawn(async { Ok(()) })
        }

        async fn list_messages(
            &self,
            conversation_id: &str,
            _order: OrderBy,
        ) -> Result<Vec<Message>, ClientError> {
            Ok(self
                .messages
                .lock()
                .get(conversation_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn send_message(
            &self,
            _conversation_id: &str,
            _text: &str,
        ) -> Result<EnvelopeStream, ClientError> {
            self.next_reply()
        }

        async fn edit_message(
            &self,
            conversation_id: &str,
            message_id: &str,
            text: &str,
        ) -> Result<EnvelopeStream, ClientError> {
            self.edits.lock().push((
                conversation_id.to_string(),
                message_id.to_string(),
                text.to_string(),
            ));
            self.next_reply()
        }

        async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ClientError> {
            self.deleted_messages
                .lock()
                .push((conversation_id.to_string(), message_id.to_string()));
            Ok(())
        }
    }

    fn conversation(id: &str, created_at: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            user_id: "u1".to_string(),
            created_at: created_at.to_string(),
            last_message_at: created_at.to_string(),
        }
    }

    fn message(id: &str, role: Role, text: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c-latest".to_string(),
            user_id: "u1".to_string(),
            role,
            text: text.to_string(),
            created_at: "2024-02-01T00:00:00Z".to_string(),
        }
    }

    fn envelope(json: &str) -> Envelope {
        serde_json::from_str(json).unwrap()
    }

    /// Backend holding an older and a newer conversation, the newer with four messages
    fn populated_backend() -> FakeBackend {
        let backend = FakeBackend::default();
        backend.conversations.lock().extend([
            conversation("c-old", "2024-01-01T00:00:00Z"),
            conversation("c-latest", "2024-02-01T00:00:00Z"),
        ]);
        backend.messages.lock().insert(
            "c-latest".to_string(),
            vec![
                message("h1", Role::Human, "first"),
                message("a1", Role::Ai, "one"),
                message("h2", Role::Human, "second"),
                message("a2", Role::Ai, "two"),
            ],
        );
        backend
    }

    struct Harness {
        controller: ConversationController<FakeBackend, BroadcastSyncChannel>,
        peer: BroadcastSyncChannel,
        peer_events: mpsc::UnboundedReceiver<SyncEvent>,
        _peer_subscription: Subscription,
    }

    impl Harness {
        fn new(backend: FakeBackend) -> Self {
            let hub = SyncHub::new();
            let controller = ConversationController::new(backend, hub.channel("chat-sync"));
            let peer = hub.channel("chat-sync");
            let (tx, peer_events) = mpsc::unbounded_channel();
            let subscription = peer.subscribe(Box::new(move |event: SyncEvent| {
                let _ = tx.send(event);
            }));
            Self {
                controller,
                peer,
                peer_events,
                _peer_subscription: subscription,
            }
        }

        async fn drain_peer_events(&mut self) -> Vec<SyncEvent> {
            sleep(Duration::from_millis(50)).await;
            let mut events = Vec::new();
            while let Ok(event) = self.peer_events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn texts(history: &[ChatEntry]) -> Vec<&str> {
        history.iter().map(|entry| entry.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_init_without_conversations_creates_one() {
        let mut h = Harness::new(FakeBackend::default());

        h.controller.initialize().await.unwrap();

        assert_eq!(h.controller.phase(), Phase::Ready);
        assert_eq!(h.controller.conversation_id().as_deref(), Some("conv-1"));
        assert!(h.controller.history().is_empty());
        assert_eq!(h.controller.backend().created.lock().len(), 1);
        assert_eq!(
            h.drain_peer_events().await,
            vec![SyncEvent::clear_history("conv-1")]
        );
    }

    #[tokio::test]
    async fn test_init_loads_most_recent_conversation() {
        let mut h = Harness::new(populated_backend());

        h.controller.initialize().await.unwrap();

        assert_eq!(h.controller.conversation_id().as_deref(), Some("c-latest"));
        let history = h.controller.history();
        assert_eq!(texts(&history), vec!["first", "one", "second", "two"]);
        assert!(history.iter().all(|entry| entry.state == MessageState::Complete));
        assert!(h.controller.backend().created.lock().is_empty());
        assert!(h.drain_peer_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_runs_once() {
        let h = Harness::new(FakeBackend::default());

        h.controller.initialize().await.unwrap();
        h.controller.initialize().await.unwrap();

        assert_eq!(h.controller.backend().created.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_init_failure_enters_error_phase() {
        let h = Harness::new(FakeBackend {
            fail_listing: true,
            ..Default::default()
        });

        let result = h.controller.initialize().await;

        assert!(matches!(result, Err(ClientError::ConversationInit(_))));
        match h.controller.phase() {
            Phase::Error(message) => assert!(message.contains("401")),
            other => panic!("unexpected phase: {:?}", other),
        }
        assert!(matches!(
            h.controller.submit("hello").await,
            Err(ClientError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_phase_events() {
        let h = Harness::new(FakeBackend::default());
        let mut events = h.controller.subscribe_events();

        h.controller.initialize().await.unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            ControllerEvent::PhaseChanged(Phase::Loading)
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            ControllerEvent::HistoryReplaced { .. }
        ));
        assert_eq!(
            events.try_recv().unwrap(),
            ControllerEvent::PhaseChanged(Phase::Ready)
        );
    }

    #[tokio::test]
    async fn test_submit_replaces_reply_text() {
        let backend = FakeBackend::default().with_reply(Reply::Envelopes(vec![
            envelope(r#"{"ai":{"text":"H"}}"#),
            envelope(r#"{"ai":{"text":"Hello"}}"#),
        ]));
        let mut h = Harness::new(backend);
        h.controller.initialize().await.unwrap();
        h.drain_peer_events().await;

        let reply = h.controller.submit("hello").await.unwrap().unwrap();

        assert_eq!(reply.text, "Hello");
        assert_eq!(reply.state, MessageState::Complete);
        let history = h.controller.history();
        assert_eq!(texts(&history), vec!["hello", "Hello"]);
        assert_eq!(history.last().unwrap().state, MessageState::Complete);
        assert!(!h.controller.is_exchange_in_flight());

        let broadcasts = h.drain_peer_events().await;
        assert_eq!(
            broadcasts,
            vec![
                SyncEvent::new_message("conv-1", PartialMessage {
                    conversation_id: Some("conv-1".to_string()),
                    ..PartialMessage::new(Role::Human, "hello")
                }),
                SyncEvent::new_message("conv-1", PartialMessage {
                    conversation_id: Some("conv-1".to_string()),
                    ..PartialMessage::new(Role::Ai, "Hello")
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_submit_is_ignored() {
        let h = Harness::new(FakeBackend::default());
        h.controller.initialize().await.unwrap();

        assert!(h.controller.submit("   ").await.unwrap().is_none());
        assert!(h.controller.history().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_confirms_human_message() {
        let backend = FakeBackend::default().with_reply(Reply::Envelopes(vec![envelope(
            r#"{"human":{"id":"h9","role":"human","text":"hello"},"ai":{"id":"a9","role":"ai","text":"Hi"}}"#,
        )]));
        let h = Harness::new(backend);
        h.controller.initialize().await.unwrap();

        h.controller.submit("hello").await.unwrap();

        let history = h.controller.history();
        assert_eq!(history[0].id.as_deref(), Some("h9"));
        assert_eq!(history[0].state, MessageState::Complete);
        assert_eq!(history[1].id.as_deref(), Some("a9"));
    }

    #[tokio::test]
    async fn test_second_submit_rejected_while_streaming() {
        let (tx, rx) = mpsc::unbounded_channel();
        let h = Harness::new(FakeBackend::default().with_reply(Reply::Channel(rx)));
        h.controller.initialize().await.unwrap();

        let controller = h.controller.clone();
        let first = tokio::spawn(async move { controller.submit("first").await });
        wait_until(|| h.controller.is_exchange_in_flight()).await;

        let second = h.controller.submit("second").await;
        assert!(matches!(second, Err(ClientError::ExchangeInFlight)));

        tx.send(envelope(r#"{"ai":{"text":"done"}}"#)).unwrap();
        drop(tx);

        let reply = first.await.unwrap().unwrap().unwrap();
        assert_eq!(reply.text, "done");
        assert!(!h.controller.is_exchange_in_flight());
        assert_eq!(texts(&h.controller.history()), vec!["first", "done"]);
    }

    #[tokio::test]
    async fn test_abandoned_submit_releases_exchange() {
        let (tx, rx) = mpsc::unbounded_channel();
        let h = Harness::new(FakeBackend::default().with_reply(Reply::Channel(rx)));
        h.controller.initialize().await.unwrap();

        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.submit("first").await });
        wait_until(|| h.controller.is_exchange_in_flight()).await;

        task.abort();
        let _ = task.await;
        drop(tx);

        assert!(!h.controller.is_exchange_in_flight());
    }

    #[tokio::test]
    async fn test_refused_send_removes_placeholder() {
        let h = Harness::new(FakeBackend::default().with_reply(Reply::Refuse));
        h.controller.initialize().await.unwrap();

        let result = h.controller.submit("hello").await;

        assert!(matches!(result, Err(ClientError::RequestFailed { status: 500, .. })));
        let history = h.controller.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Human);
        assert!(!h.controller.is_exchange_in_flight());
    }

    #[tokio::test]
    async fn test_broken_stream_keeps_partial_reply() {
        let backend = FakeBackend::default().with_reply(Reply::FailAfter(vec![envelope(
            r#"{"ai":{"text":"Hel"}}"#,
        )]));
        let mut h = Harness::new(backend);
        h.controller.initialize().await.unwrap();
        h.drain_peer_events().await;

        assert!(h.controller.submit("hello").await.is_err());

        let last = h.controller.history().pop().unwrap();
        assert_eq!(last.text, "Hel");
        assert_eq!(last.state, MessageState::Interrupted);
        assert!(!h.controller.is_exchange_in_flight());
        // Only the human message went out; the reply never completed
        assert_eq!(h.drain_peer_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_events_filtered_by_conversation() {
        let h = Harness::new(FakeBackend::default());
        h.controller.initialize().await.unwrap();

        h.peer
            .publish(SyncEvent::new_message("elsewhere", PartialMessage::new(Role::Human, "ignored")))
            .unwrap();
        h.peer
            .publish(SyncEvent::new_message("conv-1", PartialMessage::new(Role::Human, "from peer")))
            .unwrap();
        h.peer
            .publish(SyncEvent::new_message("conv-1", PartialMessage::new(Role::Ai, "reply")))
            .unwrap();

        wait_until(|| h.controller.history().len() == 2).await;
        assert_eq!(texts(&h.controller.history()), vec!["from peer", "reply"]);

        h.peer.publish(SyncEvent::clear_history("elsewhere")).unwrap();
        h.peer.publish(SyncEvent::clear_history("conv-1")).unwrap();
        wait_until(|| h.controller.history().is_empty()).await;
    }

    #[tokio::test]
    async fn test_edit_truncates_and_streams() {
        let backend = populated_backend().with_reply(Reply::Envelopes(vec![envelope(
            r#"{"human":{"id":"h3","role":"human","text":"changed"},"ai":{"id":"a3","role":"ai","text":"three"}}"#,
        )]));
        let mut h = Harness::new(backend);
        h.controller.initialize().await.unwrap();

        let reply = h.controller.edit("h2", "changed").await.unwrap().unwrap();

        assert_eq!(reply.text, "three");
        let history = h.controller.history();
        assert_eq!(texts(&history), vec!["first", "one", "changed", "three"]);
        assert_eq!(history[2].id.as_deref(), Some("h3"));
        assert_eq!(
            *h.controller.backend().edits.lock(),
            vec![(
                "c-latest".to_string(),
                "h2".to_string(),
                "changed".to_string()
            )]
        );

        let broadcasts = h.drain_peer_events().await;
        assert_eq!(broadcasts.len(), 5);
        assert_eq!(broadcasts[0], SyncEvent::clear_history("c-latest"));
        match broadcasts.last().unwrap() {
            SyncEvent::NewMessage { payload, .. } => assert_eq!(payload.text(), "three"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_edit_unknown_message() {
        let h = Harness::new(populated_backend());
        h.controller.initialize().await.unwrap();

        let result = h.controller.edit("missing", "text").await;

        assert!(matches!(result, Err(ClientError::MessageNotFound(id)) if id == "missing"));
        assert_eq!(h.controller.history().len(), 4);
        assert!(!h.controller.is_exchange_in_flight());
    }

    #[tokio::test]
    async fn test_delete_from_truncates() {
        let h = Harness::new(populated_backend());
        h.controller.initialize().await.unwrap();

        h.controller.delete_from("a1").await.unwrap();

        assert_eq!(texts(&h.controller.history()), vec!["first"]);
        assert_eq!(
            *h.controller.backend().deleted_messages.lock(),
            vec![("c-latest".to_string(), "a1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_reset_starts_fresh_conversation() {
        let mut h = Harness::new(populated_backend());
        h.controller.initialize().await.unwrap();

        let deletion = h.controller.reset().await.unwrap();
        deletion.wait().await.unwrap();

        assert_eq!(*h.controller.backend().deleted.lock(), vec!["c-latest".to_string()]);
        assert_eq!(h.controller.conversation_id().as_deref(), Some("conv-1"));
        assert!(h.controller.history().is_empty());
        assert_eq!(
            h.drain_peer_events().await,
            vec![SyncEvent::clear_history("conv-1")]
        );
    }
}
