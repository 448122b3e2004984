use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for a commit batch.
///
/// Every event saved in one `save` call carries the same batch id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Creates a new random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a batch ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event that has not yet been committed to a store.
///
/// Local sequence numbers are assigned by the aggregate emitting the event;
/// for a fixed aggregate they must be contiguous starting at 0. The store
/// validates this at save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// Per-aggregate ordinal, starting at 0.
    pub local_seq: u64,

    /// The type of the event (e.g., "OrderPlaced").
    pub event_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,
}

impl EventData {
    /// Creates a new uncommitted event.
    pub fn new(
        aggregate_id: impl Into<AggregateId>,
        local_seq: u64,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            local_seq,
            event_type: event_type.into(),
            payload,
        }
    }
}

/// A committed, immutable event as stored.
///
/// The global sequence number is assigned exactly once, at commit time, and
/// is dense and strictly increasing across the entire store. Records are
/// never mutated or reused after commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Store-wide ordinal defining the total order over all events.
    pub global_seq: u64,

    /// Per-aggregate ordinal, contiguous starting at 0.
    pub local_seq: u64,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The commit batch this event was saved in.
    pub batch_id: BatchId,

    /// When the event was committed.
    pub timestamp: DateTime<Utc>,

    /// The type of the event.
    pub event_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,
}
