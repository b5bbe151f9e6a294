//! Change notification types and the broadcast EventBus
//!
//! Events are ephemeral: they are never persisted and carry no state beyond
//! "task X changed at time T". Receivers resynchronise by pulling the
//! authoritative snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::TaskId;

/// Kind of change being announced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Responses, progress or status of a task changed
    TaskUpdated,
    /// A file attached to a task changed
    FileUpdate,
}

impl EventKind {
    /// SSE event name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskUpdated => "task_updated",
            EventKind::FileUpdate => "file_update",
        }
    }
}

/// Server-to-client change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastEvent {
    pub fn task_updated(task_id: TaskId) -> Self {
        Self {
            kind: EventKind::TaskUpdated,
            task_id,
            timestamp: crate::time::now(),
        }
    }

    pub fn file_update(task_id: TaskId) -> Self {
        Self {
            kind: EventKind::FileUpdate,
            task_id,
            timestamp: crate::time::now(),
        }
    }

    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Event distribution bus backed by `tokio::sync::broadcast`
///
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Per-subscriber FIFO order
/// - Lagging subscribers lose the oldest events, never block the bus
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BroadcastEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: BroadcastEvent,
    ) -> Result<usize, broadcast::error::SendError<BroadcastEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Returns the number of subscribers reached (0 when nobody listens).
    pub fn emit_lossy(&self, event: BroadcastEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = BroadcastEvent::task_updated(42);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_updated");
        assert_eq!(json["taskId"], 42);
        assert!(json["timestamp"].is_string());

        let back: BroadcastEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_type_method() {
        assert_eq!(BroadcastEvent::task_updated(1).event_type(), "task_updated");
        assert_eq!(BroadcastEvent::file_update(1).event_type(), "file_update");
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(BroadcastEvent::task_updated(1)).is_err());
        assert_eq!(bus.emit_lossy(BroadcastEvent::task_updated(1)), 0);
    }

    #[test]
    fn test_eventbus_multiple_subscribers_same_order() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for id in 1..=3 {
            assert_eq!(bus.emit_lossy(BroadcastEvent::task_updated(id)), 2);
        }

        for rx in [&mut rx1, &mut rx2] {
            let ids: Vec<_> = (0..3).map(|_| rx.try_recv().unwrap().task_id).collect();
            assert_eq!(ids, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_eventbus_lagging_subscriber_does_not_block() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for id in 0..10 {
            bus.emit_lossy(BroadcastEvent::task_updated(id));
        }

        // Oldest events were dropped for the lagging receiver
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
        assert_eq!(rx.try_recv().unwrap().task_id, 8);
    }
}
