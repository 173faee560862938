//! Named broadcast channels used to wake the dispatch loop after an insert.
//!
//! Notifications carry no guarantees beyond best effort: the loop re-reads the
//! whole store on every wake-up, so lost or duplicated notifications only
//! change latency.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("Event broadcaster is shut down")]
    Closed,
}

#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    /// Start receiving notifications published on `channel`
    async fn subscribe(&self, channel: &str) -> Result<Subscription, NotifyError>;

    /// Publish `payload` to every current subscriber of `channel`
    async fn notify(&self, channel: &str, payload: &str) -> Result<(), NotifyError>;
}

/// Receiving half of a channel subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: broadcast::Receiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: broadcast::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next notification. `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<String> {
        match self.receiver.recv().await {
            Ok(payload) => Some(payload),
            Err(RecvError::Lagged(skipped)) => {
                // missed notifications still mean there is something to do
                debug!(channel = %self.channel, skipped, "Notification subscriber lagged");
                Some(String::new())
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Discard queued notifications, returning how many were dropped
    pub fn drain(&mut self) -> usize {
        let mut drained = 0usize;
        loop {
            match self.receiver.try_recv() {
                Ok(_) => drained = drained.saturating_add(1),
                Err(TryRecvError::Lagged(skipped)) => {
                    drained = drained.saturating_add(skipped as usize)
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return drained,
            }
        }
    }
}

/// In-process broadcaster backed by `tokio::sync::broadcast`
#[derive(Debug)]
pub struct LocalEventBroadcaster {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
    closed: AtomicBool,
}

impl Default for LocalEventBroadcaster {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl LocalEventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Close every channel. Subscribers see the end of their stream and
    /// further subscriptions fail.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.clear();
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventBroadcaster for LocalEventBroadcaster {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, NotifyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NotifyError::Closed);
        }
        let receiver = self
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Ok(Subscription::new(channel, receiver))
    }

    async fn notify(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NotifyError::Closed);
        }
        if let Some(sender) = self.channels.get(channel) {
            // no live subscriber is not an error
            let _ = sender.send(payload.to_owned());
        }
        Ok(())
    }
}
