use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{HandlerSlot, SyncChannel, SyncEvent, SyncFrame, SyncHandler, Subscription};
use crate::error::ClientError;

const CHANNEL_CAPACITY: usize = 256;

/// Registry of in-process named channels
#[derive(Clone, Default)]
pub struct SyncHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<SyncFrame>>>>,
}

impl SyncHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new endpoint on the named channel
    pub fn channel(&self, name: &str) -> BroadcastSyncChannel {
        let sender = self
            .channels
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();
        BroadcastSyncChannel::new(sender)
    }
}

pub struct BroadcastSyncChannel {
    origin: String,
    sender: broadcast::Sender<SyncFrame>,
    slot: HandlerSlot,
}

impl BroadcastSyncChannel {
    fn new(sender: broadcast::Sender<SyncFrame>) -> Self {
        Self {
            origin: Uuid::new_v4().to_string(),
            sender,
            slot: HandlerSlot::default(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl SyncChannel for BroadcastSyncChannel {
    fn publish(&self, event: SyncEvent) -> Result<(), ClientError> {
        let frame = SyncFrame {
            origin: self.origin.clone(),
            event,
        };
        // No receivers just means no other endpoint is listening yet
        let _ = self.sender.send(frame);
        Ok(())
    }

    fn subscribe(&self, handler: SyncHandler) -> Subscription {
        let origin = self.origin.clone();
        self.slot.install(self.sender.subscribe(), move |frame: SyncFrame| {
            if frame.origin != origin {
                handler(frame.event);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PartialMessage, Role};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn collecting(filter: Option<&str>) -> (SyncHandler, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let filter = filter.map(str::to_string);
        let handler: SyncHandler = Box::new(move |event: SyncEvent| {
            if filter.as_deref().map_or(true, |id| event.concerns(id)) {
                let _ = tx.send(event);
            }
        });
        (handler, rx)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_filters_by_conversation() {
        let hub = SyncHub::new();
        let sender = hub.channel("chat-sync");
        let first = hub.channel("chat-sync");
        let second = hub.channel("chat-sync");

        let (handler, mut c1_rx) = collecting(Some("c1"));
        let _c1 = first.subscribe(handler);
        let (handler, mut c2_rx) = collecting(Some("c2"));
        let _c2 = second.subscribe(handler);

        let event = SyncEvent::new_message("c1", PartialMessage::new(Role::Human, "hi"));
        sender.publish(event.clone()).unwrap();

        let received = timeout(Duration::from_secs(1), c1_rx.recv()).await.unwrap();
        assert_eq!(received, Some(event));
        settle().await;
        assert!(c2_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publisher_does_not_hear_itself() {
        let hub = SyncHub::new();
        let a = hub.channel("chat-sync");
        let b = hub.channel("chat-sync");

        let (handler, mut a_rx) = collecting(None);
        let _a = a.subscribe(handler);
        let (handler, mut b_rx) = collecting(None);
        let _b = b.subscribe(handler);

        a.publish(SyncEvent::clear_history("c1")).unwrap();

        let received = timeout(Duration::from_secs(1), b_rx.recv()).await.unwrap();
        assert_eq!(received, Some(SyncEvent::clear_history("c1")));
        settle().await;
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channels_are_isolated_by_name() {
        let hub = SyncHub::new();
        let a = hub.channel("chat-sync");
        let other = hub.channel("elsewhere");

        let (handler, mut rx) = collecting(None);
        let _sub = other.subscribe(handler);

        a.publish(SyncEvent::clear_history("c1")).unwrap();
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_later_subscription_replaces_earlier() {
        let hub = SyncHub::new();
        let a = hub.channel("chat-sync");
        let b = hub.channel("chat-sync");

        let (handler, mut old_rx) = collecting(None);
        let old = b.subscribe(handler);
        let (handler, mut new_rx) = collecting(None);
        let _new = b.subscribe(handler);
        settle().await;
        assert!(!old.is_active());

        a.publish(SyncEvent::clear_history("c1")).unwrap();

        let received = timeout(Duration::from_secs(1), new_rx.recv()).await.unwrap();
        assert!(received.is_some());
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches() {
        let hub = SyncHub::new();
        let a = hub.channel("chat-sync");
        let b = hub.channel("chat-sync");

        let (handler, mut rx) = collecting(None);
        b.subscribe(handler).unsubscribe();
        settle().await;

        a.publish(SyncEvent::clear_history("c1")).unwrap();
        settle().await;
        assert!(rx.try_recv().is_err());
    }
}
