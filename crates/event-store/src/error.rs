use thiserror::Error;

use crate::AggregateId;

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A supplied local sequence number was already taken or not contiguous
    /// for its aggregate. Surfaced to the command caller, never swallowed.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: local sequence {local_seq} supplied, {expected} expected"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        local_seq: u64,
        expected: u64,
    },

    /// An empty batch was passed to `save`.
    #[error("Cannot save an empty event batch")]
    EmptyBatch,

    /// The backing storage failed.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
