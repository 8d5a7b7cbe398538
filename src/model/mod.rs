use crate::bus::{ChangeHandler, ChangeHandlerFuture, DataChangeMessage, Subscription};
use crate::core::{DataAction, DataError, Field, Result};
use crate::data::Entity;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{Instrument, Level, event, info_span, warn};
use uuid::Uuid;

pub mod cache;
pub mod context;
pub mod relation;
pub mod time_entry;

pub use cache::ModelCache;
pub use context::DataContext;
pub use time_entry::TimeEntryModel;

/// Pseudo-field raised when an envelope becomes shared (registered in the
/// live cache). Participates in change notifications like a payload field
/// so invariant hooks have one trigger path.
pub const IS_SHARED: Field = "is_shared";

/// Handle for removing a property-change observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

/// Entity envelope: one current payload snapshot plus lifecycle state,
/// behind a cheaply cloneable handle.
///
/// Every envelope subscribes itself to the context's change bus and
/// converges on announcements for its identity: `Put` payloads are adopted
/// field-by-field, deletions reset the envelope to a fresh unsaved state.
/// Clones share one envelope; "the same instance" always means the same
/// handle, never the same id.
pub struct Model<E: Entity> {
    shared: Arc<ModelShared<E>>,
}

pub(crate) struct ModelShared<E: Entity> {
    context: DataContext,
    state: Mutex<ModelState<E>>,
    observers: Mutex<Vec<Observer>>,
    next_observer_id: AtomicU64,
    relations: Mutex<HashMap<Field, relation::RelationSlot>>,
    subscription: Subscription,
    is_shared: AtomicBool,
}

struct ModelState<E> {
    data: E,
    loaded: bool,
    loading: Option<watch::Receiver<bool>>,
}

struct Observer {
    id: u64,
    callback: Arc<dyn Fn(Field) + Send + Sync>,
}

enum LoadPlan {
    Done,
    Await(watch::Receiver<bool>),
    Run(watch::Sender<bool>),
}

impl<E: Entity> Model<E> {
    /// Fresh unsaved envelope around a blank payload.
    pub fn new(context: &DataContext) -> Self {
        Self::from_parts(context.clone(), E::fresh(), true)
    }

    /// Envelope for a known identity. Starts unloaded (unless `id` is nil)
    /// and fills itself on [`load`](Self::load) or on first data access.
    pub fn with_id(context: &DataContext, id: Uuid) -> Self {
        let mut data = E::fresh();
        data.common_mut().id = id;
        let loaded = id.is_nil();
        Self::from_parts(context.clone(), data, loaded)
    }

    /// Envelope around an already materialized payload.
    pub fn from_data(context: &DataContext, data: E) -> Self {
        Self::from_parts(context.clone(), data, true)
    }

    fn from_parts(context: DataContext, data: E, loaded: bool) -> Self {
        let bus = context.bus().clone();
        let shared = Arc::new_cyclic(|weak: &Weak<ModelShared<E>>| {
            let weak = weak.clone();
            let handler: ChangeHandler = Arc::new(move |message: DataChangeMessage| {
                let weak = weak.clone();
                let future: ChangeHandlerFuture = Box::pin(async move {
                    let Some(shared) = weak.upgrade() else {
                        return Ok(());
                    };
                    Model { shared }.on_data_change(message).await
                });
                future
            });
            let subscription = bus.subscribe(handler);
            ModelShared {
                context,
                state: Mutex::new(ModelState {
                    data,
                    loaded,
                    loading: None,
                }),
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(1),
                relations: Mutex::new(HashMap::new()),
                subscription,
                is_shared: AtomicBool::new(false),
            }
        });
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<ModelShared<E>>) -> Self {
        Self { shared }
    }

    pub fn context(&self) -> &DataContext {
        &self.shared.context
    }

    pub fn id(&self) -> Uuid {
        self.lock_state().data.common().id
    }

    pub fn is_loaded(&self) -> bool {
        self.lock_state().loaded
    }

    pub fn is_persisted(&self) -> bool {
        !self.id().is_nil()
    }

    pub fn is_shared(&self) -> bool {
        self.shared.is_shared.load(Ordering::SeqCst)
    }

    /// Instance identity, the comparison invariant checks exclude
    /// themselves by. Never keyed on ids: two envelopes for one id are
    /// different handles.
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Current payload snapshot.
    ///
    /// Reading an unloaded envelope kicks off a background load whose
    /// failure is logged, never raised; outside a runtime the read is just
    /// the snapshot.
    pub fn data(&self) -> E {
        let (snapshot, needs_load) = {
            let state = self.lock_state();
            (state.data.clone(), !state.loaded && state.loading.is_none())
        };
        if needs_load {
            self.spawn_background_load();
        }
        snapshot
    }

    /// Fills the envelope from the store.
    ///
    /// Concurrent callers collapse onto one in-flight read; the read runs
    /// in its own task so it finishes even if callers lose interest. A
    /// store failure is reported to the caller that initiated the read,
    /// piggybacked callers only wait for the attempt to settle. A miss is
    /// not an error: the envelope keeps its payload, counts as loaded, and
    /// converges later through the bus once the row appears.
    pub async fn load(&self) -> Result<()> {
        let plan = {
            let mut state = self.lock_state();
            if state.loaded {
                LoadPlan::Done
            } else if let Some(rx) = &state.loading {
                LoadPlan::Await(rx.clone())
            } else {
                let (tx, rx) = watch::channel(false);
                state.loading = Some(rx);
                LoadPlan::Run(tx)
            }
        };

        match plan {
            LoadPlan::Done => Ok(()),
            LoadPlan::Await(mut rx) => {
                let _ = rx.wait_for(|settled| *settled).await;
                Ok(())
            }
            LoadPlan::Run(tx) => {
                let model = self.clone();
                let task = tokio::spawn(async move { model.run_load(tx).await });
                match task.await {
                    Ok(outcome) => outcome,
                    Err(err) => Err(DataError::Store(format!("load task failed: {err}"))),
                }
            }
        }
    }

    async fn run_load(self, tx: watch::Sender<bool>) -> Result<()> {
        let id = self.id();
        let fetched = if id.is_nil() {
            Ok(None)
        } else {
            self.context().fetch_by_id::<E>(id).await
        };

        let outcome = match fetched {
            Ok(Some(data)) => {
                // A reset may have raced the read; never resurrect an
                // identity this envelope no longer carries.
                if self.id() == id {
                    self.adopt(data).await
                } else {
                    Ok(())
                }
            }
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };

        {
            let mut state = self.lock_state();
            if outcome.is_ok() {
                state.loaded = true;
            }
            state.loading = None;
        }
        let _ = tx.send(true);
        outcome
    }

    /// Persists the current payload and fans the change out.
    ///
    /// Runs the payload's save hook, marks it dirty, writes it through the
    /// store, adopts the canonical row the store returned (which is where a
    /// first save picks up its identity), then publishes `Put`. By the time
    /// this returns, every subscriber has reacted.
    pub async fn save(&self) -> Result<()> {
        let span = info_span!("model.save", entity_type = %E::KIND, entity_id = %self.id());
        async {
            let mut data = { self.lock_state().data.clone() };
            data.prepare_for_save()?;
            data.common_mut().mark_dirty();

            let canonical = self.context().put_data(data).await?;
            self.adopt(canonical.clone()).await?;
            self.context()
                .publish(DataAction::Put, canonical.into_change())
                .await;

            event!(Level::DEBUG, "model saved");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Deletes the row and resets this envelope to a fresh unsaved state.
    ///
    /// A payload that never reached the server (`remote_id` is `None`) is
    /// removed from the store outright; anything the server knows about is
    /// soft-deleted so the sync layer can propagate the tombstone. The
    /// `Delete` announcement carries the pre-deletion payload, which is the
    /// identity other envelopes still hold.
    pub async fn delete(&self) -> Result<()> {
        let span = info_span!("model.delete", entity_type = %E::KIND, entity_id = %self.id());
        async {
            let snapshot = { self.lock_state().data.clone() };
            let announced = snapshot.clone().into_change();

            if snapshot.common().remote_id.is_none() {
                self.context().delete_data(&snapshot).await?;
            } else {
                let mut tombstone = snapshot;
                tombstone.common_mut().deleted_at = Some(Utc::now());
                tombstone.common_mut().mark_dirty();
                self.context().put_data(tombstone).await?;
            }

            self.reset_to_fresh().await?;
            self.context().publish(DataAction::Delete, announced).await;

            event!(Level::DEBUG, "model deleted");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Registers this envelope in the live cache and raises the
    /// [`IS_SHARED`] pseudo-field. Idempotent.
    pub async fn make_shared(&self) -> Result<()> {
        if self.shared.is_shared.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.context().cache().register(&self.shared)?;
        self.notify_observers(&[IS_SHARED]);
        E::after_change(self, &[IS_SHARED]).await
    }

    /// Registers a property-change observer. Callbacks fire once per
    /// changed field, after the payload swap, outside any lock.
    pub fn observe(&self, callback: impl Fn(Field) + Send + Sync + 'static) -> ObserverId {
        let id = self.shared.next_observer_id.fetch_add(1, Ordering::SeqCst);
        self.lock_observers().push(Observer {
            id,
            callback: Arc::new(callback),
        });
        ObserverId(id)
    }

    /// Idempotent.
    pub fn unobserve(&self, id: ObserverId) {
        self.lock_observers().retain(|observer| observer.id != id.0);
    }

    /// Replaces the payload when `incoming` differs, raising one
    /// notification per changed field and running the payload's
    /// `after_change` hook. Adopting an identical payload is free, which is
    /// what makes the self-published save announcement a no-op.
    async fn adopt(&self, incoming: E) -> Result<()> {
        let changed = {
            let mut state = self.lock_state();
            let changed = E::diff(&state.data, &incoming);
            if !changed.is_empty() {
                state.data = incoming;
            }
            changed
        };
        if changed.is_empty() {
            return Ok(());
        }
        self.notify_observers(&changed);
        E::after_change(self, &changed).await
    }

    /// Clone-edit-adopt for local mutations: applies `apply` to a copy of
    /// the payload and adopts it marked dirty. Editing nothing is a no-op.
    async fn mutate(&self, apply: impl FnOnce(&mut E) + Send) -> Result<()> {
        let current = { self.lock_state().data.clone() };
        let mut next = current.clone();
        apply(&mut next);
        if E::diff(&current, &next).is_empty() {
            return Ok(());
        }
        next.common_mut().mark_dirty();
        self.adopt(next).await
    }

    /// The one transition that clears identity: a new unsaved payload with
    /// the same content, nil id, no remote identity. Used after deletion,
    /// both locally initiated and announced by other envelopes.
    async fn reset_to_fresh(&self) -> Result<()> {
        let changed = {
            let mut state = self.lock_state();
            let mut fresh = state.data.clone();
            {
                let common = fresh.common_mut();
                common.id = Uuid::nil();
                common.remote_id = None;
                common.remote_rejected = false;
            }
            let changed = E::diff(&state.data, &fresh);
            state.data = fresh;
            state.loaded = true;
            changed
        };
        if changed.is_empty() {
            return Ok(());
        }
        self.notify_observers(&changed);
        E::after_change(self, &changed).await
    }

    async fn on_data_change(&self, message: DataChangeMessage) -> Result<()> {
        if message.data.kind() != E::KIND {
            return Ok(());
        }
        let own_id = self.id();
        if own_id.is_nil() || message.data.id() != own_id {
            return Ok(());
        }

        let erased = matches!(message.action, DataAction::Delete)
            || message.data.deleted_at().is_some();
        if erased {
            self.reset_to_fresh().await
        } else if let Some(incoming) = E::from_change(&message.data) {
            self.adopt(incoming).await
        } else {
            Ok(())
        }
    }

    fn notify_observers(&self, changed: &[Field]) {
        let callbacks: Vec<Arc<dyn Fn(Field) + Send + Sync>> = self
            .lock_observers()
            .iter()
            .map(|observer| observer.callback.clone())
            .collect();
        for &field in changed {
            for callback in &callbacks {
                callback(field);
            }
        }
    }

    fn spawn_background_load(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let model = self.clone();
        handle.spawn(async move {
            if let Err(err) = model.load().await {
                warn!(error = %err, entity_type = %E::KIND, "background load failed");
            }
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, ModelState<E>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, Vec<Observer>> {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_relations(&self) -> MutexGuard<'_, HashMap<Field, relation::RelationSlot>> {
        self.shared
            .relations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Entity> Clone for Model<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<E: Entity> fmt::Debug for Model<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("kind", &E::KIND)
            .field("id", &self.id())
            .finish()
    }
}

impl<E: Entity> Drop for ModelShared<E> {
    fn drop(&mut self) {
        self.context.bus().unsubscribe(self.subscription);
    }
}
