//! Event types published while a build runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Position in the emitting run's event stream
    pub sequence: u64,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self::with_sequence(event, 0)
    }

    pub fn with_sequence(event: Event, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence,
            event,
        }
    }
}

/// How a step's execute ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Continue,
    Halt,
}

/// All possible events in a build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Run events
    /// The runner started executing a workflow
    #[serde(rename = "run.started")]
    RunStarted { run_id: String, steps: Vec<String> },

    /// Cancellation was observed at a step boundary
    #[serde(rename = "run.cancelled")]
    RunCancelled {
        run_id: String,
        /// Step that would have run next
        next_step: Option<String>,
    },

    /// Forward execution and cleanup are both done
    #[serde(rename = "run.finished")]
    RunFinished {
        run_id: String,
        success: bool,
        executed: usize,
    },

    // Step events
    #[serde(rename = "step.started")]
    StepStarted {
        run_id: String,
        step: String,
        index: usize,
    },

    #[serde(rename = "step.completed")]
    StepCompleted {
        run_id: String,
        step: String,
        outcome: StepOutcome,
    },

    /// A step wrote the failure marker
    #[serde(rename = "step.failed")]
    StepFailed {
        run_id: String,
        step: String,
        message: String,
    },

    #[serde(rename = "step.cleaned_up")]
    StepCleanedUp { run_id: String, step: String },

    /// Cleanup blew up; the remaining cleanups still ran
    #[serde(rename = "step.cleanup_failed")]
    CleanupFailed {
        run_id: String,
        step: String,
        message: String,
    },

    // UI events
    /// Progress message for the operator
    #[serde(rename = "message")]
    Message { run_id: String, message: String },

    /// Generic error event
    #[serde(rename = "error")]
    Error {
        run_id: Option<String>,
        message: String,
    },
}

impl Event {
    /// Get the run ID associated with this event, if any
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Event::RunStarted { run_id, .. }
            | Event::RunCancelled { run_id, .. }
            | Event::RunFinished { run_id, .. }
            | Event::StepStarted { run_id, .. }
            | Event::StepCompleted { run_id, .. }
            | Event::StepFailed { run_id, .. }
            | Event::StepCleanedUp { run_id, .. }
            | Event::CleanupFailed { run_id, .. }
            | Event::Message { run_id, .. } => Some(run_id),
            Event::Error { run_id, .. } => run_id.as_deref(),
        }
    }

    /// Get the step name associated with this event, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            Event::StepStarted { step, .. }
            | Event::StepCompleted { step, .. }
            | Event::StepFailed { step, .. }
            | Event::StepCleanedUp { step, .. }
            | Event::CleanupFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
