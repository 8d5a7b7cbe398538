use crate::core::{EntityKind, Result};
use crate::data::ChangePayload;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;

pub mod memory;
mod snapshot;

pub use memory::InMemoryStore;

/// Type alias for a row predicate evaluated inside the store.
pub type RowFilter = Arc<dyn Fn(&ChangePayload) -> bool + Send + Sync>;

/// Type alias for a row ordering evaluated inside the store.
pub type RowComparator = Arc<dyn Fn(&ChangePayload, &ChangePayload) -> Ordering + Send + Sync>;

/// Contract the entity layer consumes. Any backing engine qualifies as long
/// as it honors three rules: `put` returns the row exactly as stored
/// (assigning identity to unsaved payloads), `delete` removes the row
/// outright, and `query` applies filter, then order, then limit. Soft
/// deletion is not the store's business; a tombstoned payload goes through
/// `put` like any other row.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Upserts one row and returns its canonical form. A nil id payload is
    /// assigned a fresh identity.
    async fn put(&self, data: ChangePayload) -> Result<ChangePayload>;

    /// Removes the row with the payload's identity. Unknown rows are a
    /// no-op.
    async fn delete(&self, data: &ChangePayload) -> Result<()>;

    /// All rows of `kind` matching `filter`, ordered by `order` when given,
    /// truncated to `limit` when given.
    async fn query(
        &self,
        kind: EntityKind,
        filter: RowFilter,
        order: Option<RowComparator>,
        limit: Option<usize>,
    ) -> Result<Vec<ChangePayload>>;
}

/// Most recently touched rows first.
pub fn modified_desc() -> RowComparator {
    Arc::new(|a, b| b.common().modified_at.cmp(&a.common().modified_at))
}

/// Write-behind snapshot settings for [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct StorePolicy {
    /// Snapshot the store after every N puts once a snapshot path is
    /// attached. Zero disables write-behind snapshots.
    pub snapshot_every_puts: usize,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            snapshot_every_puts: 0,
        }
    }
}
