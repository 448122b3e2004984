//! Catch-up projection engine for the query side.
//!
//! Views are denormalized read models built by replaying the globally
//! ordered event stream. This crate provides:
//! - [`View`] and [`EventSubscription`] traits for declaring a projection
//!   and the event variants it handles
//! - [`ViewLocator`] strategies mapping events to view instance ids
//! - [`ViewStore`] contract for durable view storage plus an in-memory
//!   reference backend
//! - [`PersistentViewManager`] applying events with exactly-once semantics,
//!   adaptive batch flushing and partial-failure recovery
//! - [`EventDispatcher`] orchestrating managers with per-manager failure
//!   isolation, pull catch-up and a position-based wait primitive
//! - a bounded [`retry`] helper for driving stopped managers back to
//!   consistency
//!
//! Each view manager advances independently; there is no cross-view
//! transactional consistency, by construction.

pub mod dispatcher;
pub mod error;
pub mod instance;
pub mod locator;
pub mod manager;
pub mod retry;
pub mod store;
pub mod view;

pub use common::{AggregateId, ViewId};
pub use dispatcher::{DispatchObserver, EventDispatcher};
pub use error::{Result, ViewError};
pub use instance::{UNSEEN_POSITION, ViewInstance};
pub use locator::{CustomViewLocator, LocatorContext, ViewLocator};
pub use manager::{PersistentViewManager, ViewManager, ViewManagerConfig};
pub use store::{InMemoryViewStore, ViewStore};
pub use view::{EventSubscription, View};
