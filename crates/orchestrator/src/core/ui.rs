//! Operator-facing output sink for a single run.
//!
//! Wraps an optional [`EventBus`] and stamps every event with a monotonically
//! increasing sequence number, so subscribers can order events from one run
//! even when several runs share a bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};
use tracing::{error, info};

#[derive(Clone)]
pub struct BuildUi {
    bus: Option<EventBus>,
    run_id: Arc<str>,
    sequence: Arc<AtomicU64>,
}

impl BuildUi {
    /// Create a UI that publishes onto the given bus.
    pub fn new(bus: EventBus, run_id: &str) -> Self {
        Self {
            bus: Some(bus),
            run_id: Arc::from(run_id),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a UI that only traces.
    pub fn detached(run_id: &str) -> Self {
        Self {
            bus: None,
            run_id: Arc::from(run_id),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Report progress.
    pub fn say(&self, message: impl Into<String>) {
        let message = message.into();
        info!(run_id = %self.run_id, "{}", message);
        self.emit(Event::Message {
            run_id: self.run_id.to_string(),
            message,
        });
    }

    /// Report an error the operator should see.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(run_id = %self.run_id, "{}", message);
        self.emit(Event::Error {
            run_id: Some(self.run_id.to_string()),
            message,
        });
    }

    /// Publish an event with the next sequence number.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        if let Some(ref bus) = self.bus {
            bus.publish(EventEnvelope::with_sequence(event, seq));
        }
    }

    /// Get the current sequence number (for debugging/testing).
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for BuildUi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildUi")
            .field("run_id", &self.run_id)
            .field("attached", &self.bus.is_some())
            .finish()
    }
}
