//! Event store contract and reference backend.
//!
//! Events committed through an [`EventStore`] receive a store-wide global
//! sequence number defining a total order over everything ever saved, plus
//! a per-aggregate local sequence number validated for contiguity. The
//! catch-up projection engine in the `views` crate consumes this crate
//! through the [`EventStore`] trait only, so backends are interchangeable.

pub mod error;
pub mod memory;
pub mod record;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use memory::InMemoryEventStore;
pub use record::{BatchId, EventData, RecordedEvent};
pub use store::{EventStore, EventStream};
