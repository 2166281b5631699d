//! Build event bus on top of a tokio broadcast channel

use tokio::sync::broadcast;

use crate::types::EventEnvelope;

/// Events a subscriber may fall behind by before it starts lagging. A slow
/// subscriber never blocks the build.
const CAPACITY: usize = 1024;

/// Fan-out sink for build events.
///
/// Every clone publishes into the same channel, so one bus can be shared by
/// concurrent builds; subscribers tell runs apart by `run_id`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }

    /// Publish to every current subscriber and return how many received it.
    /// With nobody listening the event is dropped.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
