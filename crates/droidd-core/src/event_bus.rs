//! In-process event bus
//!
//! Plugin-to-plugin and plugin-to-core notifications, distinct from the
//! transport's event channel (the two are not mirrored). Typed and
//! wildcard subscriptions; buffered, lossy for slow subscribers — the
//! oldest emissions are discarded first.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffer slots per subscriber
const BUS_CAPACITY: usize = 64;

/// One bus event
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub event_type: String,
    pub source: String,
    pub data: Value,
    pub timestamp: i64,
}

impl BusEvent {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        BusEvent {
            event_type: event_type.into(),
            source: source.into(),
            data,
            timestamp: droidd_proto::now_ms(),
        }
    }
}

/// Process-wide publish/subscribe channel
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        EventBus { tx }
    }

    /// Emit without blocking. With no subscribers the event is dropped.
    pub fn emit(&self, event: BusEvent) {
        debug!(event_type = %event.event_type, source = %event.source, "Bus event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to one event type
    pub fn subscribe(&self, event_type: impl Into<String>) -> BusSubscription {
        BusSubscription {
            rx: self.tx.subscribe(),
            filter: Some(event_type.into()),
        }
    }

    /// Subscribe to every event type
    pub fn subscribe_all(&self) -> BusSubscription {
        BusSubscription {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }
}

/// A bus subscription; filtered per event type unless wildcard
pub struct BusSubscription {
    rx: broadcast::Receiver<BusEvent>,
    filter: Option<String>,
}

impl BusSubscription {
    /// Next matching event. A lagged subscriber silently skips the
    /// overwritten backlog and keeps receiving. Returns None once the
    /// bus is dropped.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => match &self.filter {
                    Some(t) if &event.event_type != t => continue,
                    _ => return Some(event),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Bus subscriber lagged; oldest events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
