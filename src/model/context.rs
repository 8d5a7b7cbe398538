use crate::bus::{DataChangeMessage, MessageBus};
use crate::core::{DataAction, Result};
use crate::data::{ChangePayload, Entity};
use crate::model::ModelCache;
use crate::store::{DataStore, RowComparator, RowFilter};
use std::sync::Arc;
use uuid::Uuid;

/// Everything an envelope operates against: the bus it announces on, the
/// store it persists through, and the cache of live envelopes.
///
/// One context per data session, passed explicitly to constructors and
/// cloned cheaply. There is deliberately no global instance.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use timeledger::{DataContext, InMemoryStore, Model, Result, TimeEntryModel, UserData};
///
/// # async fn demo() -> Result<()> {
/// let context = DataContext::new(Arc::new(InMemoryStore::new()));
///
/// let user = Model::<UserData>::new(&context);
/// user.save().await?;
///
/// // Start tracking; any previously running entry for this user stops.
/// let entry = TimeEntryModel::start_new(&context, user.id()).await?;
/// entry.set_description("fix the build").await?;
///
/// entry.stop().await?;
/// entry.save().await?;
/// assert!(!entry.is_running());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DataContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    bus: MessageBus,
    store: Arc<dyn DataStore>,
    cache: ModelCache,
}

impl DataContext {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                bus: MessageBus::new(),
                store,
                cache: ModelCache::new(),
            }),
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.inner.store
    }

    pub fn cache(&self) -> &ModelCache {
        &self.inner.cache
    }

    /// Announces a change to every subscriber, live envelopes included.
    /// Out-of-band writers (a sync client, tests) use this to push rows
    /// they stored directly.
    pub async fn publish(&self, action: DataAction, data: ChangePayload) {
        self.bus().publish(DataChangeMessage { action, data }).await;
    }

    /// Typed store write; returns the canonical payload as stored.
    pub async fn put_data<E: Entity>(&self, data: E) -> Result<E> {
        let stored = self.store().put(data.into_change()).await?;
        stored.expect_kind::<E>()
    }

    pub async fn delete_data<E: Entity>(&self, data: &E) -> Result<()> {
        self.store().delete(&data.clone().into_change()).await
    }

    /// Typed point read. Soft-deleted rows are treated as absent; only the
    /// sync layer ever wants tombstones, and it queries for them
    /// explicitly.
    pub async fn fetch_by_id<E: Entity>(&self, id: Uuid) -> Result<Option<E>> {
        let filter: RowFilter =
            Arc::new(move |row| row.id() == id && row.deleted_at().is_none());
        let rows = self.store().query(E::KIND, filter, None, Some(1)).await?;
        Ok(rows.first().and_then(E::from_change))
    }

    pub async fn query_data<E: Entity>(
        &self,
        filter: RowFilter,
        order: Option<RowComparator>,
        limit: Option<usize>,
    ) -> Result<Vec<E>> {
        let rows = self.store().query(E::KIND, filter, order, limit).await?;
        Ok(rows.iter().filter_map(E::from_change).collect())
    }
}
