//! View managers: durable ownership of one view type's instances.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::marker::PhantomData;

use async_trait::async_trait;
use common::ViewId;
use event_store::{EventStore, RecordedEvent};
use futures_util::StreamExt;
use tokio::sync::{Mutex, RwLock};

use crate::error::{Result, ViewError};
use crate::instance::{UNSEEN_POSITION, ViewInstance};
use crate::locator::LocatorContext;
use crate::store::ViewStore;
use crate::view::{EventSubscription, View, is_relevant};

/// Tuning knobs for a [`PersistentViewManager`].
#[derive(Debug, Clone)]
pub struct ViewManagerConfig {
    /// Maximum number of events applied per durable flush. Must be at
    /// least 1.
    pub max_events_per_flush: usize,

    /// Whether the dispatcher may push freshly committed batches directly
    /// to this manager. Pull-only managers always catch up from the event
    /// store instead.
    pub direct_dispatch: bool,
}

impl Default for ViewManagerConfig {
    fn default() -> Self {
        Self {
            max_events_per_flush: 100,
            direct_dispatch: true,
        }
    }
}

/// Contract the event dispatcher drives view managers through.
///
/// A manager owns durable storage for one view type's instances and a
/// single watermark: the highest global sequence number it guarantees has
/// been durably applied.
#[async_trait]
pub trait ViewManager: Send + Sync {
    /// Stable name of the managed view type.
    fn name(&self) -> &'static str;

    /// Whether this manager accepts push delivery of fresh batches.
    fn accepts_direct_dispatch(&self) -> bool;

    /// Optionally purges, then catches up from the durable watermark to
    /// the event store's current tail.
    async fn initialize(&self, store: &dyn EventStore, purge_existing: bool) -> Result<()>;

    /// Returns the manager's watermark.
    ///
    /// With `allow_cached = false` the durable store is consulted; the
    /// in-process cache may be stale after a crash or a write from another
    /// process.
    async fn get_position(&self, allow_cached: bool) -> Result<i64>;

    /// Applies a freshly committed batch (push path).
    async fn dispatch(&self, store: &dyn EventStore, batch: &[RecordedEvent]) -> Result<()>;

    /// Streams missed events from the event store, from `watermark + 1` up
    /// to and including `up_to_global_seq` (pull path). Restartable from
    /// the watermark at any point of failure.
    async fn catch_up(&self, store: &dyn EventStore, up_to_global_seq: u64) -> Result<()>;

    /// Drops all instances and resets the watermark.
    async fn purge(&self) -> Result<()>;
}

/// View manager backed by a [`ViewStore`].
///
/// Events are applied strictly in increasing global sequence order under a
/// per-manager lock, flushed in chunks of `max_events_per_flush`. A failed
/// chunk is discarded and re-processed one event at a time so that
/// everything before the offending event is durably applied before the
/// manager halts.
pub struct PersistentViewManager<V: View, S> {
    view_store: S,
    config: ViewManagerConfig,
    /// In-process copy of the durable watermark. The store is the single
    /// source of truth; this only serves `allow_cached` reads.
    cached_position: RwLock<Option<i64>>,
    /// Serializes apply/flush sequences. `get_position` and `load` stay
    /// concurrent with event application.
    apply_lock: Mutex<()>,
    _view: PhantomData<V>,
}

impl<V, S> PersistentViewManager<V, S>
where
    V: View,
    S: ViewStore<V>,
{
    /// Creates a manager over the given backing store.
    ///
    /// Fails with [`ViewError::Initialization`] when the configuration is
    /// unusable; that error is fatal and never retried.
    pub fn new(view_store: S, config: ViewManagerConfig) -> Result<Self> {
        if config.max_events_per_flush == 0 {
            return Err(ViewError::Initialization {
                manager: V::name().to_string(),
                message: "max_events_per_flush must be at least 1".to_string(),
            });
        }
        Ok(Self {
            view_store,
            config,
            cached_position: RwLock::new(None),
            apply_lock: Mutex::new(()),
            _view: PhantomData,
        })
    }

    /// Creates a manager with the default configuration.
    pub fn with_defaults(view_store: S) -> Self {
        Self {
            view_store,
            config: ViewManagerConfig::default(),
            cached_position: RwLock::new(None),
            apply_lock: Mutex::new(()),
            _view: PhantomData,
        }
    }

    /// Point lookup of one view instance.
    pub async fn load(&self, id: &ViewId) -> Result<Option<ViewInstance<V>>> {
        self.view_store.get(id).await
    }

    /// Applies an ordered event sequence: bulk chunks first, degrading to
    /// single-event flushes when a chunk fails partway through.
    async fn apply_events(&self, store: &dyn EventStore, events: &[RecordedEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let _guard = self.apply_lock.lock().await;
        let mut position = self.read_position_fresh().await?;

        for chunk in events.chunks(self.config.max_events_per_flush) {
            if let Err(err) = self.apply_chunk(store, chunk, &mut position).await {
                if chunk.len() == 1 {
                    return Err(err);
                }
                tracing::warn!(
                    view = V::name(),
                    error = %err,
                    "chunk failed; re-processing one event at a time"
                );
                for event in chunk {
                    self.apply_chunk(store, std::slice::from_ref(event), &mut position)
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Applies one chunk and flushes it atomically with the new watermark.
    /// On error nothing is persisted and the in-memory changes are dropped.
    async fn apply_chunk(
        &self,
        store: &dyn EventStore,
        chunk: &[RecordedEvent],
        position: &mut i64,
    ) -> Result<()> {
        let Some(last) = chunk.last() else {
            return Ok(());
        };

        let context = LocatorContext::new(store);
        let locator = V::locator();
        let mut touched: HashMap<ViewId, ViewInstance<V>> = HashMap::new();

        for record in chunk {
            // Relevance is checked before locating: an event with no
            // applicable handler is skipped outright.
            if !is_relevant::<V>(record) {
                continue;
            }
            let ids = locator.affected_view_ids(&context, record).await?;
            if ids.is_empty() {
                continue;
            }
            let Some(event) = V::Event::decode(record)? else {
                continue;
            };

            for id in ids {
                let instance = match touched.entry(id) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let loaded = match self.view_store.get(entry.key()).await? {
                            Some(existing) => existing,
                            None => ViewInstance::new(entry.key().clone()),
                        };
                        entry.insert(loaded)
                    }
                };

                if instance.failed || instance.has_applied(record.global_seq) {
                    continue;
                }

                match instance.view.apply(&event, record) {
                    Ok(()) => instance.last_global_seq = record.global_seq as i64,
                    Err(err) if V::isolates_instance_failures() => {
                        tracing::error!(
                            view = V::name(),
                            view_id = %instance.id,
                            global_seq = record.global_seq,
                            error = %err,
                            "instance failed; freezing at last good position"
                        );
                        metrics::counter!("view_instances_failed_total").increment(1);
                        instance.failed = true;
                    }
                    Err(err) => {
                        return Err(ViewError::apply(
                            V::name(),
                            instance.id.as_str(),
                            record.global_seq,
                            err.to_string(),
                        ));
                    }
                }
            }
        }

        // The watermark never regresses, even when an already-seen batch
        // is redelivered.
        let watermark = (*position).max(last.global_seq as i64);
        self.view_store
            .flush(touched.into_values().collect(), watermark)
            .await?;
        *self.cached_position.write().await = Some(watermark);
        *position = watermark;

        metrics::counter!("views_events_applied_total").increment(chunk.len() as u64);
        metrics::counter!("views_flushes_total").increment(1);
        Ok(())
    }

    async fn read_position_fresh(&self) -> Result<i64> {
        let watermark = self.view_store.read_watermark().await?;
        *self.cached_position.write().await = Some(watermark);
        Ok(watermark)
    }
}

#[async_trait]
impl<V, S> ViewManager for PersistentViewManager<V, S>
where
    V: View,
    S: ViewStore<V>,
{
    fn name(&self) -> &'static str {
        V::name()
    }

    fn accepts_direct_dispatch(&self) -> bool {
        self.config.direct_dispatch
    }

    #[tracing::instrument(skip_all, fields(view = V::name()))]
    async fn initialize(&self, store: &dyn EventStore, purge_existing: bool) -> Result<()> {
        if purge_existing {
            self.purge().await?;
        }
        let next = store.next_global_sequence_number().await?;
        if next == 0 {
            self.read_position_fresh().await?;
            return Ok(());
        }
        self.catch_up(store, next - 1).await
    }

    async fn get_position(&self, allow_cached: bool) -> Result<i64> {
        if allow_cached && let Some(cached) = *self.cached_position.read().await {
            return Ok(cached);
        }
        self.read_position_fresh().await
    }

    async fn dispatch(&self, store: &dyn EventStore, batch: &[RecordedEvent]) -> Result<()> {
        self.apply_events(store, batch).await
    }

    #[tracing::instrument(skip(self, store), fields(view = V::name()))]
    async fn catch_up(&self, store: &dyn EventStore, up_to_global_seq: u64) -> Result<()> {
        let position = self.get_position(false).await?;
        if position >= up_to_global_seq as i64 {
            return Ok(());
        }

        let mut stream = store.stream((position + 1) as u64).await?;
        let mut pending = Vec::with_capacity(self.config.max_events_per_flush);
        while let Some(result) = stream.next().await {
            let record = result?;
            if record.global_seq > up_to_global_seq {
                break;
            }
            pending.push(record);
            if pending.len() >= self.config.max_events_per_flush {
                self.apply_events(store, &pending).await?;
                pending.clear();
            }
        }
        self.apply_events(store, &pending).await?;

        tracing::debug!(view = V::name(), up_to = up_to_global_seq, "catch-up complete");
        Ok(())
    }

    async fn purge(&self) -> Result<()> {
        let _guard = self.apply_lock.lock().await;
        self.view_store.purge().await?;
        *self.cached_position.write().await = Some(UNSEEN_POSITION);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::ViewLocator;
    use crate::store::InMemoryViewStore;
    use event_store::{AggregateId, BatchId, InMemoryEventStore};
    use serde::{Deserialize, Serialize};

    #[derive(Debug)]
    enum CounterEvent {
        Ticked { poison: bool },
    }

    impl EventSubscription for CounterEvent {
        fn event_types() -> &'static [&'static str] {
            &["Ticked"]
        }

        fn decode(record: &RecordedEvent) -> Result<Option<Self>> {
            match record.event_type.as_str() {
                "Ticked" => {
                    let poison = record
                        .payload
                        .get("poison")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    Ok(Some(CounterEvent::Ticked { poison }))
                }
                _ => Ok(None),
            }
        }
    }

    /// Counts handled events; fails on poisoned payloads.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct CounterView {
        events_handled: u64,
    }

    impl CounterView {
        fn apply_counter(&mut self, event: &CounterEvent, record: &RecordedEvent) -> Result<()> {
            let CounterEvent::Ticked { poison } = event;
            if *poison {
                return Err(ViewError::apply(
                    "CounterView",
                    record.aggregate_id.as_str(),
                    record.global_seq,
                    "poisoned event",
                ));
            }
            self.events_handled += 1;
            Ok(())
        }
    }

    impl View for CounterView {
        type Event = CounterEvent;

        fn name() -> &'static str {
            "CounterView"
        }

        fn locator() -> ViewLocator {
            ViewLocator::PerAggregateRoot
        }

        fn apply(&mut self, event: &Self::Event, record: &RecordedEvent) -> Result<()> {
            self.apply_counter(event, record)
        }
    }

    /// Same view, but opted into individual-failure isolation.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct IsolatingCounterView {
        inner: CounterView,
    }

    impl View for IsolatingCounterView {
        type Event = CounterEvent;

        fn name() -> &'static str {
            "IsolatingCounterView"
        }

        fn locator() -> ViewLocator {
            ViewLocator::PerAggregateRoot
        }

        fn isolates_instance_failures() -> bool {
            true
        }

        fn apply(&mut self, event: &Self::Event, record: &RecordedEvent) -> Result<()> {
            self.inner.apply_counter(event, record)
        }
    }

    fn record(aggregate_id: &str, local_seq: u64, global_seq: u64) -> RecordedEvent {
        RecordedEvent {
            global_seq,
            local_seq,
            aggregate_id: AggregateId::new(aggregate_id),
            batch_id: BatchId::new(),
            timestamp: chrono::Utc::now(),
            event_type: "Ticked".to_string(),
            payload: serde_json::json!({}),
        }
    }

    fn poisoned(aggregate_id: &str, local_seq: u64, global_seq: u64) -> RecordedEvent {
        let mut record = record(aggregate_id, local_seq, global_seq);
        record.payload = serde_json::json!({"poison": true});
        record
    }

    fn manager<V: View>(
        max_events_per_flush: usize,
    ) -> PersistentViewManager<V, InMemoryViewStore<V>> {
        PersistentViewManager::new(
            InMemoryViewStore::new(),
            ViewManagerConfig {
                max_events_per_flush,
                direct_dispatch: true,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn zero_flush_size_is_an_initialization_error() {
        let result: Result<PersistentViewManager<CounterView, _>> = PersistentViewManager::new(
            InMemoryViewStore::new(),
            ViewManagerConfig {
                max_events_per_flush: 0,
                direct_dispatch: true,
            },
        );
        assert!(matches!(result, Err(ViewError::Initialization { .. })));
    }

    #[tokio::test]
    async fn dispatch_builds_one_instance_per_aggregate() {
        let store = InMemoryEventStore::new();
        let manager = manager::<CounterView>(100);

        let batch = vec![
            record("a", 0, 0),
            record("b", 0, 1),
            record("a", 1, 2),
        ];
        manager.dispatch(&store, &batch).await.unwrap();

        let a = manager.load(&ViewId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.view.events_handled, 2);
        assert_eq!(a.last_global_seq, 2);
        let b = manager.load(&ViewId::new("b")).await.unwrap().unwrap();
        assert_eq!(b.view.events_handled, 1);
        assert_eq!(b.last_global_seq, 1);
        assert_eq!(manager.get_position(false).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let manager = manager::<CounterView>(100);

        let batch = vec![record("a", 0, 0), record("a", 1, 1)];
        manager.dispatch(&store, &batch).await.unwrap();
        manager.dispatch(&store, &batch).await.unwrap();

        let a = manager.load(&ViewId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.view.events_handled, 2);
        assert_eq!(manager.get_position(false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn irrelevant_events_advance_the_watermark_only() {
        let store = InMemoryEventStore::new();
        let manager = manager::<CounterView>(100);

        let mut other = record("a", 1, 1);
        other.event_type = "SomethingElse".to_string();
        manager
            .dispatch(&store, &[record("a", 0, 0), other])
            .await
            .unwrap();

        let a = manager.load(&ViewId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.view.events_handled, 1);
        assert_eq!(a.last_global_seq, 0);
        // The manager observed the irrelevant event even though no
        // instance applied it.
        assert_eq!(manager.get_position(false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_chunk_degrades_to_single_event_flushes() {
        let store = InMemoryEventStore::new();
        let manager = manager::<CounterView>(2);

        // Global sequences 0..=4, the event at global_seq 3 poisoned.
        let batch = vec![
            record("a", 0, 0),
            record("a", 1, 1),
            record("a", 2, 2),
            poisoned("a", 3, 3),
            record("a", 4, 4),
        ];
        let err = manager.dispatch(&store, &batch).await.unwrap_err();
        assert!(matches!(err, ViewError::Apply { global_seq: 3, .. }));

        // Everything before the offending event is durable.
        let a = manager.load(&ViewId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.view.events_handled, 3);
        assert_eq!(a.last_global_seq, 2);
        assert_eq!(manager.get_position(false).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn halted_manager_resumes_exactly_where_it_stopped() {
        let store = InMemoryEventStore::new();
        let manager = manager::<CounterView>(2);

        let batch = vec![record("a", 0, 0), poisoned("a", 1, 1), record("a", 2, 2)];
        manager.dispatch(&store, &batch).await.unwrap_err();
        assert_eq!(manager.get_position(false).await.unwrap(), 0);

        // Redeliver with the poison cleared, as if the defect were fixed.
        let fixed = vec![record("a", 0, 0), record("a", 1, 1), record("a", 2, 2)];
        manager.dispatch(&store, &fixed).await.unwrap();

        let a = manager.load(&ViewId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.view.events_handled, 3);
        assert_eq!(manager.get_position(false).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn instance_failures_are_isolated_when_opted_in() {
        let store = InMemoryEventStore::new();
        let manager = manager::<IsolatingCounterView>(100);

        // Aggregates a, b, c with 5 events each; c's 4th event fails.
        let mut batch = Vec::new();
        let mut global_seq = 0;
        for local_seq in 0..5u64 {
            for aggregate in ["a", "b", "c"] {
                if aggregate == "c" && local_seq == 3 {
                    batch.push(poisoned(aggregate, local_seq, global_seq));
                } else {
                    batch.push(record(aggregate, local_seq, global_seq));
                }
                global_seq += 1;
            }
        }

        // The batch as a whole succeeds.
        manager.dispatch(&store, &batch).await.unwrap();

        for healthy in ["a", "b"] {
            let instance = manager.load(&ViewId::new(healthy)).await.unwrap().unwrap();
            assert_eq!(instance.view.inner.events_handled, 5);
            assert!(!instance.failed);
        }

        let c = manager.load(&ViewId::new("c")).await.unwrap().unwrap();
        assert!(c.failed);
        assert_eq!(c.view.inner.events_handled, 3);
        // Frozen at the last good position; later events never applied.
        assert_eq!(c.last_global_seq, 8);
        assert_eq!(manager.get_position(false).await.unwrap(), 14);
    }

    #[tokio::test]
    async fn catch_up_streams_from_watermark() {
        let store = InMemoryEventStore::new();
        let mut events = Vec::new();
        for seq in 0..10u64 {
            events.push(event_store::EventData::new(
                "a",
                seq,
                "Ticked",
                serde_json::json!({}),
            ));
        }
        store.save(BatchId::new(), events).await.unwrap();

        let manager = manager::<CounterView>(3);
        manager.catch_up(&store, 6).await.unwrap();
        assert_eq!(manager.get_position(false).await.unwrap(), 6);

        let a = manager.load(&ViewId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.view.events_handled, 7);

        // Resume to the tail.
        manager.catch_up(&store, 9).await.unwrap();
        let a = manager.load(&ViewId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.view.events_handled, 10);
    }

    #[tokio::test]
    async fn catch_up_is_a_no_op_when_already_ahead() {
        let store = InMemoryEventStore::new();
        let manager = manager::<CounterView>(100);
        manager
            .dispatch(&store, &[record("a", 0, 0), record("a", 1, 1)])
            .await
            .unwrap();

        // Nothing in the store, but the bound is behind the watermark.
        manager.catch_up(&store, 0).await.unwrap();
        assert_eq!(manager.get_position(false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn initialize_purges_and_replays() {
        let store = InMemoryEventStore::new();
        store
            .save(
                BatchId::new(),
                vec![
                    event_store::EventData::new("a", 0, "Ticked", serde_json::json!({})),
                    event_store::EventData::new("a", 1, "Ticked", serde_json::json!({})),
                ],
            )
            .await
            .unwrap();

        let manager = manager::<CounterView>(100);
        manager.dispatch(&store, &[record("a", 0, 0)]).await.unwrap();

        manager.initialize(&store, true).await.unwrap();

        let a = manager.load(&ViewId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.view.events_handled, 2);
        assert_eq!(manager.get_position(false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn initialize_on_empty_store() {
        let store = InMemoryEventStore::new();
        let manager = manager::<CounterView>(100);
        manager.initialize(&store, false).await.unwrap();
        assert_eq!(manager.get_position(true).await.unwrap(), UNSEEN_POSITION);
    }

    #[tokio::test]
    async fn purge_resets_position() {
        let store = InMemoryEventStore::new();
        let manager = manager::<CounterView>(100);
        manager.dispatch(&store, &[record("a", 0, 0)]).await.unwrap();

        ViewManager::purge(&manager).await.unwrap();

        assert!(manager.load(&ViewId::new("a")).await.unwrap().is_none());
        assert_eq!(manager.get_position(false).await.unwrap(), UNSEEN_POSITION);
    }
}
