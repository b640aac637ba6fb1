//! Cross-instance publish/subscribe for conversation updates.
//!
//! Every running client joins a named channel. Events published by one
//! endpoint reach every other endpoint on the same channel, never the
//! publisher itself.

pub mod event;
pub mod local;
#[cfg(unix)]
pub mod socket;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::warn;

use crate::error::ClientError;

pub use event::{SyncEvent, SyncFrame};
pub use local::{BroadcastSyncChannel, SyncHub};
#[cfg(unix)]
pub use socket::SocketSyncChannel;

pub type SyncHandler = Box<dyn Fn(SyncEvent) + Send + Sync + 'static>;

pub trait SyncChannel: Send + Sync + 'static {
    /// Deliver an event to every other endpoint on the channel
    fn publish(&self, event: SyncEvent) -> Result<(), ClientError>;

    /// Install the endpoint's event handler.
    ///
    /// Only one handler is active per endpoint: subscribing again replaces the
    /// previous handler. Must be called from within a tokio runtime.
    fn subscribe(&self, handler: SyncHandler) -> Subscription;
}

impl SyncChannel for Box<dyn SyncChannel> {
    fn publish(&self, event: SyncEvent) -> Result<(), ClientError> {
        (**self).publish(event)
    }

    fn subscribe(&self, handler: SyncHandler) -> Subscription {
        (**self).subscribe(handler)
    }
}

/// Keeps a handler attached; dropping it detaches the handler
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    handle: AbortHandle,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The single active handler task of an endpoint
#[derive(Default)]
pub(crate) struct HandlerSlot {
    active: Mutex<Option<AbortHandle>>,
}

impl HandlerSlot {
    /// Run `handler` for every value received on `rx`, replacing whatever ran before
    pub(crate) fn install<T, F>(&self, mut rx: broadcast::Receiver<T>, handler: F) -> Subscription
    where
        T: Clone + Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(value) => handler(value),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sync subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let handle = task.abort_handle();
        if let Some(previous) = self.active.lock().replace(handle.clone()) {
            previous.abort();
        }
        Subscription { handle }
    }
}

impl Drop for HandlerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.active.get_mut().take() {
            handle.abort();
        }
    }
}
