use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use timeledger::data::time_entry::fields as entry_fields;
use timeledger::{
    ChangePayload, DataAction, DataContext, DataStore, Entity, EntityKind, InMemoryStore, Model,
    ProjectData, Result, RowComparator, RowFilter, TaskData, TimeEntryData, TimeEntryModel,
    UserData, WorkspaceData,
};

/// In-memory store that counts reads, so tests can tell a slot hit from a
/// fresh hydration.
struct CountingStore {
    inner: InMemoryStore,
    queries: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            queries: AtomicUsize::new(0),
        }
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for CountingStore {
    async fn put(&self, data: ChangePayload) -> Result<ChangePayload> {
        self.inner.put(data).await
    }

    async fn delete(&self, data: &ChangePayload) -> Result<()> {
        self.inner.delete(data).await
    }

    async fn query(
        &self,
        kind: EntityKind,
        filter: RowFilter,
        order: Option<RowComparator>,
        limit: Option<usize>,
    ) -> Result<Vec<ChangePayload>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(kind, filter, order, limit).await
    }
}

fn harness() -> (Arc<CountingStore>, DataContext) {
    let store = Arc::new(CountingStore::new());
    let context = DataContext::new(store.clone());
    (store, context)
}

fn entry_with(
    context: &DataContext,
    write: impl FnOnce(&mut TimeEntryData),
) -> TimeEntryModel {
    let mut data = TimeEntryData::new();
    write(&mut data);
    Model::from_data(context, data)
}

#[tokio::test]
async fn a_relation_is_fetched_once_then_served_from_its_slot() {
    let (store, context) = harness();

    let workspace = Model::from_data(&context, WorkspaceData::named("acme"));
    workspace.save().await.unwrap();

    let entry = entry_with(&context, |data| data.workspace_id = Some(workspace.id()));
    assert_eq!(store.queries(), 0);

    let first = entry.workspace().await.unwrap().unwrap();
    assert_eq!(first.data().name, "acme");
    assert_eq!(store.queries(), 1);

    let second = entry.workspace().await.unwrap().unwrap();
    assert!(first.same_handle(&second));
    assert_eq!(store.queries(), 1);
}

#[tokio::test]
async fn a_missing_foreign_id_never_touches_the_store() {
    let (store, context) = harness();

    let entry = entry_with(&context, |_| {});

    assert!(entry.workspace().await.unwrap().is_none());
    assert!(entry.project().await.unwrap().is_none());
    assert_eq!(store.queries(), 0);
}

#[tokio::test]
async fn a_dangling_foreign_id_is_absent_and_retried_next_time() {
    let (store, context) = harness();

    let ghost = uuid::Uuid::new_v4();
    let entry = entry_with(&context, |data| data.project_id = Some(ghost));

    assert!(entry.project().await.unwrap().is_none());
    assert_eq!(store.queries(), 1);

    // A miss is not cached: the row may appear later (sync backfill), so
    // every read asks again until one lands.
    assert!(entry.project().await.unwrap().is_none());
    assert_eq!(store.queries(), 2);

    let mut project = ProjectData::new();
    project.name = "backfilled".to_string();
    project.common.id = ghost;
    context.put_data(project).await.unwrap();

    let resolved = entry.project().await.unwrap().unwrap();
    assert_eq!(resolved.data().name, "backfilled");
    assert_eq!(store.queries(), 3);
}

#[tokio::test]
async fn a_live_shared_envelope_is_preferred_over_hydrating() {
    let (store, context) = harness();

    let user = Model::<UserData>::new(&context);
    user.make_shared().await.unwrap();
    user.save().await.unwrap();

    let entry = entry_with(&context, |data| data.user_id = Some(user.id()));

    let resolved = entry.user().await.unwrap().unwrap();
    assert!(resolved.same_handle(&user));
    assert_eq!(store.queries(), 0);
}

#[tokio::test]
async fn set_related_caches_the_handle_and_notifies_the_id_field() {
    let (store, context) = harness();

    let mut data = ProjectData::new();
    data.name = "website".to_string();
    let project = Model::from_data(&context, data);
    project.save().await.unwrap();

    let entry = entry_with(&context, |_| {});
    let log: Arc<Mutex<Vec<timeledger::Field>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let log = log.clone();
        entry.observe(move |field| log.lock().unwrap().push(field));
    }

    entry.set_project(Some(&project)).await.unwrap();

    assert_eq!(entry.data().project_id, Some(project.id()));
    assert!(entry.data().common.is_dirty);
    let seen = log.lock().unwrap();
    assert_eq!(
        seen.iter()
            .filter(|field| **field == entry_fields::PROJECT_ID)
            .count(),
        1
    );
    drop(seen);

    // The handle went straight into the slot; resolving reads nothing.
    let resolved = entry.project().await.unwrap().unwrap();
    assert!(resolved.same_handle(&project));
    assert_eq!(store.queries(), 0);
}

#[tokio::test]
async fn linking_an_unsaved_envelope_clears_the_id() {
    let (store, context) = harness();

    let task = Model::<TaskData>::new(&context);
    let entry = entry_with(&context, |_| {});

    entry.set_task(Some(&task)).await.unwrap();

    assert_eq!(entry.data().task_id, None);
    assert!(entry.task().await.unwrap().is_none());
    assert_eq!(store.queries(), 0);
}

#[tokio::test]
async fn clearing_a_relation_drops_the_slot() {
    let (store, context) = harness();

    let workspace = Model::from_data(&context, WorkspaceData::named("acme"));
    workspace.save().await.unwrap();

    let entry = entry_with(&context, |_| {});
    entry.set_workspace(Some(&workspace)).await.unwrap();
    assert!(entry.workspace().await.unwrap().is_some());

    entry.set_workspace(None).await.unwrap();

    assert_eq!(entry.data().workspace_id, None);
    assert!(entry.workspace().await.unwrap().is_none());
    assert_eq!(store.queries(), 0);
}

#[tokio::test]
async fn adopting_a_new_foreign_id_invalidates_the_slot() {
    let (store, context) = harness();

    let alpha = Model::from_data(&context, WorkspaceData::named("alpha"));
    alpha.save().await.unwrap();
    let beta = Model::from_data(&context, WorkspaceData::named("beta"));
    beta.save().await.unwrap();

    let entry = entry_with(&context, |data| data.workspace_id = Some(alpha.id()));
    entry.save().await.unwrap();

    let resolved = entry.workspace().await.unwrap().unwrap();
    assert_eq!(resolved.data().name, "alpha");
    assert_eq!(store.queries(), 1);

    // Another writer moves the entry to a different workspace and announces
    // it; the envelope adopts the new id, which makes the old slot stale.
    let mut rewritten = entry.data();
    rewritten.workspace_id = Some(beta.id());
    let canonical = context.put_data(rewritten).await.unwrap();
    context.publish(DataAction::Put, canonical.into_change()).await;

    assert_eq!(entry.data().workspace_id, Some(beta.id()));
    let resolved = entry.workspace().await.unwrap().unwrap();
    assert_eq!(resolved.data().name, "beta");
    assert_eq!(store.queries(), 2);
}
