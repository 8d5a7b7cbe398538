use crate::core::{EntityKind, Result};
use crate::data::Entity;
use crate::model::{Model, ModelShared};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use uuid::Uuid;

/// Weak per-kind registry of live "shared" envelopes.
///
/// Holds weak references only, so registration never extends an envelope's
/// lifetime; scans prune entries whose envelopes were dropped. Two
/// envelopes carrying the same id may coexist here until the bus converges
/// them, so id lookups mean "first live match", nothing stronger.
pub struct ModelCache {
    inner: Mutex<HashMap<EntityKind, Vec<Weak<dyn Any + Send + Sync>>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn register<E: Entity>(&self, shared: &Arc<ModelShared<E>>) -> Result<()> {
        // Downgrade against the concrete type, then unsize the weak handle.
        let weak = Arc::downgrade(shared);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        let mut inner = self.inner.lock()?;
        inner.entry(E::KIND).or_default().push(weak);
        Ok(())
    }

    /// All live envelopes of `E`, pruning dead registrations on the way.
    pub fn live<E: Entity>(&self) -> Result<Vec<Model<E>>> {
        let mut inner = self.inner.lock()?;
        let Some(entries) = inner.get_mut(&E::KIND) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        entries.retain(|weak| match weak.upgrade() {
            Some(strong) => {
                if let Ok(shared) = strong.downcast::<ModelShared<E>>() {
                    found.push(Model::from_shared(shared));
                }
                true
            }
            None => false,
        });
        Ok(found)
    }

    /// First live envelope currently carrying `id`.
    pub fn find_by_id<E: Entity>(&self, id: Uuid) -> Result<Option<Model<E>>> {
        Ok(self.live::<E>()?.into_iter().find(|model| model.id() == id))
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}
