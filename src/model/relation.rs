use crate::core::{Field, Result};
use crate::data::Entity;
use crate::model::Model;
use std::any::Any;
use uuid::Uuid;

/// A resolved foreign relation: the envelope last handed out for this
/// relation and the foreign id it was resolved against. Stale once the id
/// field moves on.
pub(crate) struct RelationSlot {
    resolved_for: Uuid,
    handle: Box<dyn Any + Send + Sync>,
}

impl<E: Entity> Model<E> {
    /// Lazily resolves a many-to-one relation.
    ///
    /// `current_id` is the foreign id field as of the caller's snapshot.
    /// `None` resolves to absent; so does a dangling id whose row does not
    /// exist, without error. A previously resolved envelope is reused as
    /// long as the id field still matches, and live cached envelopes are
    /// preferred over hydrating a second instance. Nothing is fetched
    /// eagerly and nothing cascades.
    pub async fn related<R: Entity>(
        &self,
        field: Field,
        current_id: Option<Uuid>,
    ) -> Result<Option<Model<R>>> {
        let Some(id) = current_id else {
            self.clear_relation(field);
            return Ok(None);
        };

        if let Some(cached) = self.cached_relation::<R>(field, id) {
            return Ok(Some(cached));
        }

        if let Some(live) = self.context().cache().find_by_id::<R>(id)? {
            self.store_relation(field, id, &live);
            return Ok(Some(live));
        }

        match self.context().fetch_by_id::<R>(id).await? {
            None => Ok(None),
            Some(data) => {
                let handle = Model::from_data(self.context(), data);
                self.store_relation(field, id, &handle);
                Ok(Some(handle))
            }
        }
    }

    /// Rewrites the foreign id through the normal mutate path (dirty plus
    /// field notification) and caches `related` as the resolved envelope,
    /// skipping the next load. An unsaved related envelope clears the id.
    pub async fn set_related<R: Entity>(
        &self,
        field: Field,
        related: Option<&Model<R>>,
        write_id: impl FnOnce(&mut E, Option<Uuid>) + Send,
    ) -> Result<()> {
        let id = related.and_then(|handle| {
            let id = handle.id();
            (!id.is_nil()).then_some(id)
        });

        self.mutate(|data| write_id(data, id)).await?;

        match (related, id) {
            (Some(handle), Some(id)) => self.store_relation(field, id, handle),
            _ => self.clear_relation(field),
        }
        Ok(())
    }

    fn cached_relation<R: Entity>(&self, field: Field, id: Uuid) -> Option<Model<R>> {
        let slots = self.lock_relations();
        let slot = slots.get(field)?;
        if slot.resolved_for != id {
            return None;
        }
        slot.handle.downcast_ref::<Model<R>>().cloned()
    }

    fn store_relation<R: Entity>(&self, field: Field, id: Uuid, handle: &Model<R>) {
        self.lock_relations().insert(
            field,
            RelationSlot {
                resolved_for: id,
                handle: Box::new(handle.clone()),
            },
        );
    }

    fn clear_relation(&self, field: Field) {
        self.lock_relations().remove(field);
    }
}
