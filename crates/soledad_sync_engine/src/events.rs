//! Progress events.

use std::fmt;
use tokio::sync::broadcast;

/// Progress of a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// `sent` of `total` documents have been accepted by the remote.
    SendStatus {
        /// Documents sent so far.
        sent: usize,
        /// Documents in the send phase.
        total: usize,
    },
    /// `received` of `total` documents have been received.
    ReceiveStatus {
        /// Documents received so far.
        received: usize,
        /// Documents in the receive phase.
        total: usize,
    },
}

impl SyncEvent {
    /// Event name as exposed to listeners.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::SendStatus { .. } => "SYNC_SEND_STATUS",
            SyncEvent::ReceiveStatus { .. } => "SYNC_RECEIVE_STATUS",
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::SendStatus { sent, total } => write!(f, "{sent}/{total}"),
            SyncEvent::ReceiveStatus { received, total } => write!(f, "{received}/{total}"),
        }
    }
}

/// Fan-out of [`SyncEvent`]s to any number of subscribers.
///
/// Emitting never blocks; a subscriber that falls behind loses the oldest
/// events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Emits `event`.
    pub fn emit(&self, event: SyncEvent) {
        tracing::debug!(event = event.name(), status = %event, "sync progress");
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_format() {
        let event = SyncEvent::SendStatus { sent: 2, total: 5 };
        assert_eq!(event.to_string(), "2/5");
        assert_eq!(event.name(), "SYNC_SEND_STATUS");
        let event = SyncEvent::ReceiveStatus {
            received: 1,
            total: 1,
        };
        assert_eq!(event.name(), "SYNC_RECEIVE_STATUS");
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(SyncEvent::SendStatus { sent: 1, total: 2 });
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::SendStatus { sent: 1, total: 2 });
    }

    #[test]
    fn emit_without_subscribers() {
        EventBus::new(1).emit(SyncEvent::SendStatus { sent: 1, total: 1 });
    }
}
