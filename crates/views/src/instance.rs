//! Per-id view instance envelope.

use common::ViewId;
use serde::{Deserialize, Serialize};

/// Watermark sentinel for an instance (or manager) that has never applied
/// an event.
pub const UNSEEN_POSITION: i64 = -1;

/// One denormalized projection record, keyed by a locator-derived id.
///
/// Owned exclusively by its view manager's backing store; never shared
/// across managers. Created on the first relevant event for a new id,
/// mutated in place by event application, destroyed only by a purge of the
/// whole view type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewInstance<V> {
    /// Locator-derived identity of this instance.
    pub id: ViewId,

    /// Highest global sequence number applied to this instance,
    /// [`UNSEEN_POSITION`] if none yet.
    pub last_global_seq: i64,

    /// Set when the view opts into individual-failure isolation and apply
    /// logic failed for this instance. A failed instance is frozen at its
    /// last good position and receives no further events.
    pub failed: bool,

    /// The projection state itself.
    pub view: V,
}

impl<V: Default> ViewInstance<V> {
    /// Creates a fresh instance positioned before the first event.
    pub fn new(id: ViewId) -> Self {
        Self {
            id,
            last_global_seq: UNSEEN_POSITION,
            failed: false,
            view: V::default(),
        }
    }
}

impl<V> ViewInstance<V> {
    /// True when this instance has already applied the given global
    /// sequence number. Redelivery of such an event must be a no-op.
    pub fn has_applied(&self, global_seq: u64) -> bool {
        self.last_global_seq >= global_seq as i64
    }
}
