use crate::core::{EntityKind, Result};
use crate::data::ChangePayload;
use crate::store::{DataStore, RowComparator, RowFilter, StorePolicy, snapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

type Table = Arc<RwLock<HashMap<Uuid, ChangePayload>>>;

/// Reference [`DataStore`]: one table per entity kind, whole-row
/// replacement on put, optional JSON snapshotting for offline restarts.
///
/// Each table sits behind its own lock so traffic on one kind never blocks
/// another. Snapshots are write-behind and best effort; a failed snapshot
/// is logged, the put that triggered it still succeeds.
pub struct InMemoryStore {
    tables: HashMap<EntityKind, Table>,
    policy: StorePolicy,
    snapshot_path: Mutex<Option<PathBuf>>,
    puts_since_snapshot: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_policy(StorePolicy::default())
    }

    pub fn with_policy(policy: StorePolicy) -> Self {
        let mut tables = HashMap::new();
        for kind in EntityKind::ALL {
            tables.insert(kind, Arc::new(RwLock::new(HashMap::new())));
        }
        Self {
            tables,
            policy,
            snapshot_path: Mutex::new(None),
            puts_since_snapshot: AtomicUsize::new(0),
        }
    }

    /// Arms write-behind snapshotting. Takes effect from the next put.
    pub fn attach_snapshot_path(&self, path: impl Into<PathBuf>) {
        *self.lock_path() = Some(path.into());
    }

    /// Serializes every table into one JSON file, written atomically via a
    /// sibling `.tmp` file.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let mut rows = Vec::new();
        for table in self.tables.values() {
            rows.extend(table.read().await.values().cloned());
        }
        snapshot::write_snapshot(path, rows).await
    }

    /// Loads rows from a snapshot file into the store. Missing file is a
    /// no-op so cold starts and restarts share one code path.
    pub async fn restore_snapshot(&self, path: &Path) -> Result<()> {
        let Some(rows) = snapshot::read_snapshot(path).await? else {
            return Ok(());
        };
        for row in rows {
            let table = self.table(row.kind()).clone();
            let id = row.id();
            table.write().await.insert(id, row);
        }
        Ok(())
    }

    /// Number of rows currently stored for `kind`, tombstones included.
    pub async fn count(&self, kind: EntityKind) -> usize {
        self.table(kind).read().await.len()
    }

    // One table per kind, all built in the constructor.
    fn table(&self, kind: EntityKind) -> &Table {
        &self.tables[&kind]
    }

    fn lock_path(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.snapshot_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn maybe_snapshot(&self) {
        let every = self.policy.snapshot_every_puts;
        if every == 0 {
            return;
        }
        let Some(path) = self.lock_path().clone() else {
            return;
        };
        let writes = self.puts_since_snapshot.fetch_add(1, Ordering::SeqCst) + 1;
        if writes % every != 0 {
            return;
        }
        if let Err(err) = self.save_snapshot(&path).await {
            warn!(error = %err, path = %path.display(), "write-behind snapshot failed");
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn put(&self, mut data: ChangePayload) -> Result<ChangePayload> {
        if data.id().is_nil() {
            data.common_mut().id = Uuid::new_v4();
        }
        let table = self.table(data.kind()).clone();
        table.write().await.insert(data.id(), data.clone());
        self.maybe_snapshot().await;
        Ok(data)
    }

    async fn delete(&self, data: &ChangePayload) -> Result<()> {
        let table = self.table(data.kind()).clone();
        table.write().await.remove(&data.id());
        Ok(())
    }

    async fn query(
        &self,
        kind: EntityKind,
        filter: RowFilter,
        order: Option<RowComparator>,
        limit: Option<usize>,
    ) -> Result<Vec<ChangePayload>> {
        let table = self.table(kind).clone();
        let mut rows: Vec<ChangePayload> = {
            let guard = table.read().await;
            guard.values().filter(|row| filter(row)).cloned().collect()
        };
        if let Some(cmp) = order {
            rows.sort_by(|a, b| cmp(a, b));
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
