//! Event dispatcher: orchestrates view managers over the committed stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use event_store::{EventStore, RecordedEvent};
use tokio::sync::RwLock;

use crate::error::{Result, ViewError};
use crate::manager::ViewManager;
use crate::retry;

/// Default interval for the `wait_until_processed` poll loop.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Hook notified when a manager stops or recovers.
///
/// Failures are isolated per manager but never silently discarded: every
/// stop and recovery is reported here, in addition to the tracing log.
pub trait DispatchObserver: Send + Sync {
    /// A manager failed and was flagged as stopped.
    fn view_manager_stopped(&self, _manager: &str, _error: &ViewError) {}

    /// A previously stopped manager caught up successfully.
    fn view_manager_recovered(&self, _manager: &str) {}
}

struct ManagerSlot {
    manager: Arc<dyn ViewManager>,
    stopped: AtomicBool,
    last_error: RwLock<Option<String>>,
}

/// Feeds committed event batches to a set of view managers.
///
/// Per-manager failure isolation is the core invariant: one broken
/// projection never stops another, nor the command path that triggered the
/// dispatch. A stopped manager is retried on the next `dispatch` or
/// `initialize`, or explicitly through [`catch_up_with_retries`].
///
/// [`catch_up_with_retries`]: EventDispatcher::catch_up_with_retries
pub struct EventDispatcher<S> {
    store: S,
    managers: Vec<ManagerSlot>,
    observers: Vec<Arc<dyn DispatchObserver>>,
    wait_poll_interval: Duration,
}

impl<S: EventStore> EventDispatcher<S> {
    /// Creates a dispatcher over the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            managers: Vec::new(),
            observers: Vec::new(),
            wait_poll_interval: WAIT_POLL_INTERVAL,
        }
    }

    /// Registers a view manager. New managers start as not stopped.
    pub fn register(&mut self, manager: Arc<dyn ViewManager>) {
        self.managers.push(ManagerSlot {
            manager,
            stopped: AtomicBool::new(false),
            last_error: RwLock::new(None),
        });
    }

    /// Registers an observer for stop/recovery notifications.
    pub fn add_observer(&mut self, observer: Arc<dyn DispatchObserver>) {
        self.observers.push(observer);
    }

    /// Returns the number of registered managers.
    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }

    /// Initializes every manager, optionally purging first.
    ///
    /// A failed startup catch-up flags that manager as stopped and moves
    /// on; it never blocks the others.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self, purge_existing: bool) -> Result<()> {
        for slot in &self.managers {
            let result = slot
                .manager
                .initialize(&self.store, purge_existing)
                .await;
            self.note_outcome(slot, &result).await;
        }
        Ok(())
    }

    /// Delivers one freshly committed batch, called once per commit.
    ///
    /// A manager whose position is exactly contiguous with the batch head
    /// gets the batch pushed directly, without any event store read; one
    /// that is behind (or pull-only) catches up from the store instead,
    /// bounded by the batch tail.
    #[tracing::instrument(skip(self, batch), fields(events = batch.len()))]
    pub async fn dispatch(&self, batch: &[RecordedEvent]) -> Result<()> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Ok(());
        };
        metrics::counter!("dispatcher_batches_total").increment(1);

        for slot in &self.managers {
            let result = self
                .deliver(slot, batch, first.global_seq, last.global_seq)
                .await;
            self.note_outcome(slot, &result).await;
        }
        Ok(())
    }

    async fn deliver(
        &self,
        slot: &ManagerSlot,
        batch: &[RecordedEvent],
        first_seq: u64,
        last_seq: u64,
    ) -> Result<()> {
        let manager = &slot.manager;
        if manager.accepts_direct_dispatch() {
            let position = manager.get_position(true).await?;
            if position + 1 == first_seq as i64 {
                return manager.dispatch(&self.store, batch).await;
            }
            if position >= last_seq as i64 {
                // Already past this batch, nothing to do.
                return Ok(());
            }
        }
        manager.catch_up(&self.store, last_seq).await
    }

    /// Flips the stopped flag according to the outcome and notifies
    /// observers on transitions.
    async fn note_outcome(&self, slot: &ManagerSlot, result: &Result<()>) {
        match result {
            Ok(()) => {
                if slot.stopped.swap(false, Ordering::SeqCst) {
                    tracing::info!(manager = slot.manager.name(), "view manager recovered");
                    for observer in &self.observers {
                        observer.view_manager_recovered(slot.manager.name());
                    }
                }
                *slot.last_error.write().await = None;
            }
            Err(err) => {
                slot.stopped.store(true, Ordering::SeqCst);
                *slot.last_error.write().await = Some(err.to_string());
                tracing::error!(
                    manager = slot.manager.name(),
                    error = %err,
                    "view manager stopped"
                );
                metrics::counter!("view_manager_failures_total").increment(1);
                for observer in &self.observers {
                    observer.view_manager_stopped(slot.manager.name(), err);
                }
            }
        }
    }

    /// Drives one manager from a known-bad state back to the store tail,
    /// retrying with jittered backoff up to `max_retries` extra attempts.
    pub async fn catch_up_with_retries(
        &self,
        manager_name: &str,
        max_retries: u32,
    ) -> Result<()> {
        let slot = self.find(manager_name)?;
        let result = retry::retry(
            || async {
                let next = self.store.next_global_sequence_number().await?;
                if next == 0 {
                    return Ok(());
                }
                slot.manager.catch_up(&self.store, next - 1).await
            },
            max_retries,
        )
        .await;
        self.note_outcome(slot, &result).await;
        result
    }

    /// Blocks until the named manager's durable position reaches
    /// `target_position`, polling at a short fixed interval.
    ///
    /// Reads bypass the in-process cache so a position written by another
    /// process is seen. Cancellation is by timeout only; on deadline the
    /// error names the manager and the remaining gap.
    pub async fn wait_until_processed(
        &self,
        manager_name: &str,
        target_position: i64,
        timeout: Duration,
    ) -> Result<()> {
        let slot = self.find(manager_name)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = slot.manager.get_position(false).await?;
            if current >= target_position {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ViewError::WaitTimeout {
                    manager: manager_name.to_string(),
                    target: target_position,
                    current,
                });
            }
            tokio::time::sleep(self.wait_poll_interval).await;
        }
    }

    /// Returns every manager's name and position.
    pub async fn positions(&self, allow_cached: bool) -> Result<Vec<(String, i64)>> {
        let mut positions = Vec::with_capacity(self.managers.len());
        for slot in &self.managers {
            let position = slot.manager.get_position(allow_cached).await?;
            positions.push((slot.manager.name().to_string(), position));
        }
        Ok(positions)
    }

    /// Returns the position of the slowest manager, None when none are
    /// registered.
    pub async fn lowest_position(&self, allow_cached: bool) -> Result<Option<i64>> {
        Ok(self
            .positions(allow_cached)
            .await?
            .into_iter()
            .map(|(_, position)| position)
            .min())
    }

    /// Whether the named manager is currently flagged as stopped.
    pub fn is_stopped(&self, manager_name: &str) -> Result<bool> {
        Ok(self.find(manager_name)?.stopped.load(Ordering::SeqCst))
    }

    /// Names of all currently stopped managers, for monitoring.
    pub fn stopped_managers(&self) -> Vec<&'static str> {
        self.managers
            .iter()
            .filter(|slot| slot.stopped.load(Ordering::SeqCst))
            .map(|slot| slot.manager.name())
            .collect()
    }

    /// Last recorded error for the named manager, if it is stopped.
    pub async fn last_error(&self, manager_name: &str) -> Result<Option<String>> {
        Ok(self.find(manager_name)?.last_error.read().await.clone())
    }

    fn find(&self, manager_name: &str) -> Result<&ManagerSlot> {
        self.managers
            .iter()
            .find(|slot| slot.manager.name() == manager_name)
            .ok_or_else(|| ViewError::UnknownManager(manager_name.to_string()))
    }
}
