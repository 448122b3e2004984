//! View locator strategies.
//!
//! A locator is a pure mapping from an event to the set of view instance
//! ids it affects. It holds no state and has no lifecycle beyond process
//! startup.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, ViewId};
use event_store::{EventStore, RecordedEvent};

use crate::Result;

/// Read-only ambient context handed to custom locators.
///
/// Exposes just enough of the event store to let a locator load other
/// aggregates while computing ids; it cannot mutate anything.
pub struct LocatorContext<'a> {
    store: &'a dyn EventStore,
}

impl<'a> LocatorContext<'a> {
    /// Wraps an event store for read-only locator access.
    pub fn new(store: &'a dyn EventStore) -> Self {
        Self { store }
    }

    /// Loads events for another aggregate, ordered by local sequence.
    pub async fn load_events(
        &self,
        aggregate_id: &AggregateId,
        first_local_seq: u64,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>> {
        Ok(self
            .store
            .load(aggregate_id, first_local_seq, limit)
            .await?)
    }
}

/// Caller-supplied locator logic for the [`ViewLocator::Custom`] strategy.
#[async_trait]
pub trait CustomViewLocator: Send + Sync {
    /// Computes the ids of the view instances affected by this event.
    async fn affected_view_ids(
        &self,
        context: &LocatorContext<'_>,
        record: &RecordedEvent,
    ) -> Result<Vec<ViewId>>;
}

/// Strategy for deriving view instance ids from events.
#[derive(Clone)]
pub enum ViewLocator {
    /// One instance per distinct aggregate root; the id is the aggregate id.
    PerAggregateRoot,

    /// A single instance with a constant id, regardless of aggregate.
    GlobalInstance(&'static str),

    /// Caller-supplied mapping with read access to the event store.
    Custom(Arc<dyn CustomViewLocator>),
}

impl ViewLocator {
    /// Resolves the instance ids affected by one event.
    pub async fn affected_view_ids(
        &self,
        context: &LocatorContext<'_>,
        record: &RecordedEvent,
    ) -> Result<Vec<ViewId>> {
        match self {
            Self::PerAggregateRoot => Ok(vec![ViewId::from(&record.aggregate_id)]),
            Self::GlobalInstance(id) => Ok(vec![ViewId::new(*id)]),
            Self::Custom(locator) => locator.affected_view_ids(context, record).await,
        }
    }
}

impl std::fmt::Debug for ViewLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerAggregateRoot => write!(f, "PerAggregateRoot"),
            Self::GlobalInstance(id) => write!(f, "GlobalInstance({id})"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}
