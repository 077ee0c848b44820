//! Live event fan-out to subscribers.
//!
//! The engine publishes through the [`Broadcaster`] capability injected at
//! construction; the transport layer subscribes on its own side. Delivery is
//! best-effort with no backpressure -- a slow or absent subscriber never
//! delays a sampling loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// An event delivered to live subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub test_id: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, test_id: &str, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            test_id: test_id.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Capability for delivering events to whoever is listening right now.
pub trait Broadcaster: Send + Sync {
    /// Deliver an event to all current subscribers. Must not block and must
    /// not fail the caller; delivery is best-effort.
    fn publish(&self, event: Event);
}

/// Broadcaster over a tokio broadcast channel. Subscribers that fall behind
/// the channel capacity miss events rather than applying backpressure.
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<Event>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Open a new live subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, event: Event) {
        // send() errs only when there are no subscribers; that is fine.
        let _ = self.tx.send(event);
    }
}

/// Discards every event. Used by one-off CLI runs and tests that do not
/// care about the live stream.
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn publish(&self, _event: Event) {}
}
