use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, BatchId, EventData, EventStoreError, RecordedEvent, Result};

/// A stream of committed events, ordered by global sequence number.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RecordedEvent>> + Send>>;

/// Core trait for event store implementations.
///
/// An event store persists events and assigns the store-wide total order.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically commits a batch of events.
    ///
    /// Assigns dense, strictly increasing global sequence numbers and
    /// validates that each event's local sequence number is the next one
    /// expected for its aggregate. Fails with
    /// [`EventStoreError::ConcurrencyConflict`] if a local sequence number
    /// is already taken or leaves a gap; in that case nothing is committed.
    ///
    /// Returns the committed records, in the order they were assigned.
    async fn save(&self, batch_id: BatchId, events: Vec<EventData>) -> Result<Vec<RecordedEvent>>;

    /// Loads events for one aggregate, ordered by local sequence number,
    /// starting at `first_local_seq`, at most `limit` records.
    async fn load(
        &self,
        aggregate_id: &AggregateId,
        first_local_seq: u64,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>>;

    /// Streams all events with `global_seq >= from_global_seq`, ordered by
    /// global sequence number.
    async fn stream(&self, from_global_seq: u64) -> Result<EventStream>;

    /// Returns the global sequence number the next committed event will
    /// receive. Equals the total number of events ever committed.
    async fn next_global_sequence_number(&self) -> Result<u64>;
}

/// Validates a batch before committing it.
///
/// Checks that the batch is non-empty and that, within the batch, events for
/// the same aggregate carry strictly increasing, contiguous local sequence
/// numbers. Cross-batch contiguity against already-stored events is the
/// store's responsibility.
pub fn validate_batch(events: &[EventData]) -> Result<()> {
    if events.is_empty() {
        return Err(EventStoreError::EmptyBatch);
    }

    let mut last_seen: std::collections::HashMap<&AggregateId, u64> =
        std::collections::HashMap::new();
    for event in events {
        if let Some(&prev) = last_seen.get(&event.aggregate_id)
            && event.local_seq != prev + 1
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id.clone(),
                local_seq: event.local_seq,
                expected: prev + 1,
            });
        }
        last_seen.insert(&event.aggregate_id, event.local_seq);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: &str, local_seq: u64) -> EventData {
        EventData::new(aggregate_id, local_seq, "TestEvent", serde_json::json!({}))
    }

    #[test]
    fn empty_batch_rejected() {
        assert!(matches!(
            validate_batch(&[]),
            Err(EventStoreError::EmptyBatch)
        ));
    }

    #[test]
    fn contiguous_batch_accepted() {
        let events = vec![event("x", 0), event("x", 1), event("y", 0)];
        assert!(validate_batch(&events).is_ok());
    }

    #[test]
    fn gap_within_batch_rejected() {
        let events = vec![event("x", 0), event("x", 2)];
        assert!(matches!(
            validate_batch(&events),
            Err(EventStoreError::ConcurrencyConflict { expected: 1, .. })
        ));
    }

    #[test]
    fn duplicate_within_batch_rejected() {
        let events = vec![event("x", 3), event("x", 3)];
        assert!(matches!(
            validate_batch(&events),
            Err(EventStoreError::ConcurrencyConflict { local_seq: 3, .. })
        ));
    }
}
