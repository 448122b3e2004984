use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, BatchId, EventData, EventStoreError, RecordedEvent, Result,
    store::{EventStore, EventStream, validate_batch},
};

#[derive(Default)]
struct Inner {
    /// All committed events, in global sequence order.
    events: Vec<RecordedEvent>,
    /// Next expected local sequence number per aggregate.
    next_local: HashMap<AggregateId, u64>,
}

/// In-memory event store implementation.
///
/// Commits under a single write lock, so global sequence assignment and
/// per-aggregate contiguity checks are atomic. Intended for tests and as
/// the reference behavior for durable backends.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.events.clear();
        inner.next_local.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, batch_id: BatchId, events: Vec<EventData>) -> Result<Vec<RecordedEvent>> {
        validate_batch(&events)?;

        let mut inner = self.inner.write().await;

        // Validate cross-batch contiguity before committing anything.
        let mut expected = inner.next_local.clone();
        for event in &events {
            let next = expected.get(&event.aggregate_id).copied().unwrap_or(0);
            if event.local_seq != next {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: event.aggregate_id.clone(),
                    local_seq: event.local_seq,
                    expected: next,
                });
            }
            expected.insert(event.aggregate_id.clone(), next + 1);
        }

        let timestamp = Utc::now();
        let mut next_global = inner.events.len() as u64;
        let mut recorded = Vec::with_capacity(events.len());
        for event in events {
            recorded.push(RecordedEvent {
                global_seq: next_global,
                local_seq: event.local_seq,
                aggregate_id: event.aggregate_id,
                batch_id,
                timestamp,
                event_type: event.event_type,
                payload: event.payload,
            });
            next_global += 1;
        }

        inner.next_local = expected;
        inner.events.extend(recorded.iter().cloned());

        tracing::debug!(
            batch_id = %batch_id,
            events = recorded.len(),
            last_global_seq = next_global - 1,
            "batch committed"
        );

        Ok(recorded)
    }

    async fn load(
        &self,
        aggregate_id: &AggregateId,
        first_local_seq: u64,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| &e.aggregate_id == aggregate_id && e.local_seq >= first_local_seq)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.local_seq);
        events.truncate(limit);
        Ok(events)
    }

    async fn stream(&self, from_global_seq: u64) -> Result<EventStream> {
        use futures_util::stream;

        let inner = self.inner.read().await;
        // Events are already held in global sequence order.
        let events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.global_seq >= from_global_seq)
            .cloned()
            .collect();

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn next_global_sequence_number(&self) -> Result<u64> {
        Ok(self.inner.read().await.events.len() as u64)
    }
}
