//! View backing store contract and in-memory reference backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ViewId;
use tokio::sync::RwLock;

use crate::Result;
use crate::instance::{UNSEEN_POSITION, ViewInstance};
use crate::view::View;

/// Durable storage for one view type's instances and watermark.
///
/// Any store providing these four operations is acceptable; the engine
/// requires that `flush` persists the touched instances and the watermark
/// atomically, and that `get`/`read_watermark` never observe a torn write.
#[async_trait]
pub trait ViewStore<V: View>: Send + Sync {
    /// Point lookup by view id.
    async fn get(&self, id: &ViewId) -> Result<Option<ViewInstance<V>>>;

    /// Atomically upserts the given instances and advances the persisted
    /// watermark.
    async fn flush(&self, instances: Vec<ViewInstance<V>>, watermark: i64) -> Result<()>;

    /// Reads the persisted watermark: the highest global sequence number
    /// durably applied, [`UNSEEN_POSITION`] if none.
    async fn read_watermark(&self) -> Result<i64>;

    /// Drops all instances and resets the watermark to
    /// [`UNSEEN_POSITION`].
    async fn purge(&self) -> Result<()>;
}

struct Inner<V> {
    instances: HashMap<ViewId, ViewInstance<V>>,
    watermark: i64,
}

/// In-memory view store.
///
/// One `RwLock` over instances and watermark together makes `flush` atomic
/// and reads consistent. Intended for tests and as the reference behavior
/// for durable backends.
#[derive(Clone)]
pub struct InMemoryViewStore<V: View> {
    inner: Arc<RwLock<Inner<V>>>,
}

impl<V: View> InMemoryViewStore<V> {
    /// Creates a new empty view store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                instances: HashMap::new(),
                watermark: UNSEEN_POSITION,
            })),
        }
    }

    /// Returns the number of stored instances.
    pub async fn instance_count(&self) -> usize {
        self.inner.read().await.instances.len()
    }
}

impl<V: View> Default for InMemoryViewStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: View> ViewStore<V> for InMemoryViewStore<V> {
    async fn get(&self, id: &ViewId) -> Result<Option<ViewInstance<V>>> {
        Ok(self.inner.read().await.instances.get(id).cloned())
    }

    async fn flush(&self, instances: Vec<ViewInstance<V>>, watermark: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        for instance in instances {
            inner.instances.insert(instance.id.clone(), instance);
        }
        inner.watermark = watermark;
        Ok(())
    }

    async fn read_watermark(&self) -> Result<i64> {
        Ok(self.inner.read().await.watermark)
    }

    async fn purge(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.instances.clear();
        inner.watermark = UNSEEN_POSITION;
        Ok(())
    }
}
