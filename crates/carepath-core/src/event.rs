use tokio::sync::broadcast;

use crate::types::EngineEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Outbound event bus between the engine and the transport layer.
///
/// A thin wrapper over a tokio broadcast channel: every subscriber sees
/// every event, and publishing never blocks the traversal worker. With
/// no subscribers attached the event is simply dropped.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        // no receivers is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
