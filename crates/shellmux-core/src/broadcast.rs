//! Fan-out of terminal events to any number of subscribers.

use crate::events::TerminalEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Default per-subscriber event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Receives events from sessions and the manager and delivers them onward.
///
/// Implementations must not block the caller and must tolerate concurrent
/// calls from many tasks.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: TerminalEvent);
}

/// Broadcaster backed by a tokio broadcast channel.
///
/// Subscribers that fall more than the channel capacity behind lose the
/// oldest events. Publishing with no subscribers drops the event.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<TerminalEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Start receiving every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: TerminalEvent) {
        let kind = event.event_type();
        if let Err(broadcast::error::SendError(_)) = self.tx.send(event) {
            trace!(event = kind, "no subscribers, event dropped");
        }
    }
}
