//! Fan-out of committed update events.
//!
//! Publishing is fire-and-forget from the transition path's point of view:
//! the service logs a failed publish and moves on, because the transition
//! it announces has already been committed and must not be rolled back for
//! a notification problem.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::events::StatusUpdateEvent;

/// Default broadcast channel capacity. Slow subscribers past this many
/// undelivered events start lagging and miss the oldest ones.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("update publish failed: {reason}")]
pub struct PublishError {
    pub reason: String,
}

/// Sink for committed update events.
#[async_trait]
pub trait UpdatePublisher: Send + Sync {
    async fn publish(&self, event: StatusUpdateEvent) -> Result<(), PublishError>;
}

/// Process-local publisher over a tokio broadcast channel. Cheap to clone;
/// clones share the channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<StatusUpdateEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// A receiver that sees every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdateEvent> {
        self.sender.subscribe()
    }

    /// Live receiver count.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[async_trait]
impl UpdatePublisher for BroadcastPublisher {
    async fn publish(&self, event: StatusUpdateEvent) -> Result<(), PublishError> {
        // A send error only means nobody is subscribed right now, which is
        // a normal state, not a failure.
        let _ = self.sender.send(event);
        Ok(())
    }
}
