//! Event types and broadcast bus for the discovery pipeline
//!
//! Events are broadcast to all subscribers (SSE streams, tests). Emission
//! never blocks and never fails the emitting pipeline stage; if no subscriber
//! is listening the event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Discovery run started
    DiscoveryStarted {
        run_id: Uuid,
        scope: String,
        sources: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Discovery run completed (possibly with partial failures)
    DiscoveryCompleted {
        run_id: Uuid,
        saved: usize,
        duplicates: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// A candidate survived dedup and was persisted in pending state
    CandidateSaved {
        run_id: Uuid,
        record_id: Uuid,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A candidate matched an existing record
    DuplicateFound {
        run_id: Uuid,
        matched_record_id: Uuid,
        similarity: f64,
        timestamp: DateTime<Utc>,
    },

    /// A candidate needs another round of operator input before it can be saved
    InputRequested {
        run_id: Uuid,
        question: String,
        timestamp: DateTime<Utc>,
    },

    /// Enrichment completed for a record
    EnrichmentCompleted {
        record_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Enrichment attempt failed; item re-queued after backoff
    EnrichmentRetry {
        record_id: Uuid,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Enrichment exhausted its attempts; item moved to the dead list
    EnrichmentDead {
        record_id: Uuid,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name matching the serialized `type` tag, used for SSE framing
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::DiscoveryStarted { .. } => "DiscoveryStarted",
            PipelineEvent::DiscoveryCompleted { .. } => "DiscoveryCompleted",
            PipelineEvent::CandidateSaved { .. } => "CandidateSaved",
            PipelineEvent::DuplicateFound { .. } => "DuplicateFound",
            PipelineEvent::InputRequested { .. } => "InputRequested",
            PipelineEvent::EnrichmentCompleted { .. } => "EnrichmentCompleted",
            PipelineEvent::EnrichmentRetry { .. } => "EnrichmentRetry",
            PipelineEvent::EnrichmentDead { .. } => "EnrichmentDead",
        }
    }
}

/// Broadcast bus for pipeline events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new bus with the given channel capacity
    ///
    /// Slow subscribers lag and drop old events rather than blocking emitters.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers
    ///
    /// Returns the number of subscribers that received the event. Zero
    /// subscribers is not an error.
    pub fn emit(&self, event: PipelineEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
