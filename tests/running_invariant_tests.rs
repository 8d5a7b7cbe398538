use chrono::Utc;
use std::sync::{Arc, Mutex};
use timeledger::data::time_entry::encode_running_since;
use timeledger::{
    ChangePayload, DataContext, DataStore, EntityKind, Field, InMemoryStore, Model, RowFilter,
    TimeEntryData, TimeEntryModel, running_entry,
};
use uuid::Uuid;

fn harness() -> (Arc<InMemoryStore>, DataContext) {
    let store = Arc::new(InMemoryStore::new());
    let context = DataContext::new(store.clone());
    (store, context)
}

fn running_payload(user_id: Uuid) -> TimeEntryData {
    let now = Utc::now();
    let mut data = TimeEntryData::new();
    data.user_id = Some(user_id);
    data.start_time = now;
    data.duration = encode_running_since(now);
    data.running = true;
    data
}

async fn running_rows(store: &InMemoryStore, user_id: Uuid) -> Vec<ChangePayload> {
    let filter: RowFilter = Arc::new(move |row| match row.expect_kind::<TimeEntryData>() {
        Ok(data) => data.running && data.user_id == Some(user_id) && data.common.deleted_at.is_none(),
        Err(_) => false,
    });
    store
        .query(EntityKind::TimeEntry, filter, None, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn starting_a_new_entry_stops_the_previous_one() {
    let (store, context) = harness();
    let user_id = Uuid::new_v4();

    let first = TimeEntryModel::start_new(&context, user_id).await.unwrap();
    assert!(first.is_running());

    let second = TimeEntryModel::start_new(&context, user_id).await.unwrap();

    assert!(second.is_running());
    assert!(!first.is_running());
    // The stopped entry decoded back to a plain total.
    assert!(first.data().duration >= 0);

    let rows = running_rows(&store, user_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), second.id());
}

#[tokio::test]
async fn out_of_band_running_rows_are_stopped_on_the_next_trigger() {
    let (store, context) = harness();
    let user_id = Uuid::new_v4();

    // Rows written behind the entity layer's back, the way a sync pull
    // would land them.
    for _ in 0..3 {
        context.put_data(running_payload(user_id)).await.unwrap();
    }
    assert_eq!(running_rows(&store, user_id).await.len(), 3);

    let entry = TimeEntryModel::start_new(&context, user_id).await.unwrap();

    let rows = running_rows(&store, user_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), entry.id());
    assert!(entry.is_running());
}

#[tokio::test]
async fn continuing_switches_the_running_entry() {
    let (store, context) = harness();
    let user_id = Uuid::new_v4();

    let first = TimeEntryModel::start_new(&context, user_id).await.unwrap();

    let mut data = TimeEntryData::new();
    data.user_id = Some(user_id);
    data.start_time = Utc::now();
    data.duration = 600;
    data.duration_only = true;
    let second = Model::from_data(&context, data);
    second.make_shared().await.unwrap();
    second.save().await.unwrap();

    let resumed = second.continue_entry().await.unwrap();

    assert!(resumed.same_handle(&second));
    assert!(second.is_running());
    assert!(!first.is_running());

    let rows = running_rows(&store, user_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), second.id());
}

#[tokio::test]
async fn an_unshared_running_entry_does_not_enforce() {
    let (_store, context) = harness();
    let user_id = Uuid::new_v4();

    let first = TimeEntryModel::start_new(&context, user_id).await.unwrap();

    let mut data = TimeEntryData::new();
    data.user_id = Some(user_id);
    data.start_time = Utc::now();
    data.duration = 300;
    let local = Model::from_data(&context, data);
    local.set_running(true).await.unwrap();

    assert!(local.is_running());
    assert!(first.is_running());
}

#[tokio::test]
async fn a_shared_draft_is_stopped_without_persisting_it() {
    let (store, context) = harness();
    let user_id = Uuid::new_v4();

    // Running, shared, never saved.
    let draft = Model::from_data(&context, running_payload(user_id));
    draft.make_shared().await.unwrap();
    assert!(draft.is_running());
    assert!(!draft.is_persisted());

    let entry = TimeEntryModel::start_new(&context, user_id).await.unwrap();

    // The draft was corrected in place, not written to the store.
    assert!(!draft.is_running());
    assert!(!draft.is_persisted());
    assert!(entry.is_running());
    let rows = running_rows(&store, user_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), entry.id());

    // Saving the stopped draft later does not unseat the newer entry.
    draft.save().await.unwrap();
    assert!(entry.is_running());
    assert!(!draft.is_running());
    assert_eq!(running_rows(&store, user_id).await.len(), 1);
}

#[tokio::test]
async fn other_users_entries_are_untouched() {
    let (store, context) = harness();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let hers = TimeEntryModel::start_new(&context, alice).await.unwrap();
    let his = TimeEntryModel::start_new(&context, bob).await.unwrap();

    assert!(hers.is_running());
    assert!(his.is_running());
    assert_eq!(running_rows(&store, alice).await.len(), 1);
    assert_eq!(running_rows(&store, bob).await.len(), 1);
}

#[tokio::test]
async fn rewriting_the_same_running_value_is_a_noop() {
    let (_store, context) = harness();
    let entry = TimeEntryModel::start_new(&context, Uuid::new_v4())
        .await
        .unwrap();

    let log: Arc<Mutex<Vec<Field>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let log = log.clone();
        entry.observe(move |field| log.lock().unwrap().push(field));
    }

    entry.set_running(true).await.unwrap();

    assert!(entry.is_running());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn re_running_the_active_entry_is_a_noop_and_running_the_other_switches() {
    let (store, context) = harness();
    let user_id = Uuid::new_v4();

    let first = TimeEntryModel::start_new(&context, user_id).await.unwrap();

    let mut data = TimeEntryData::new();
    data.user_id = Some(user_id);
    data.start_time = Utc::now();
    data.duration = 300;
    let second = Model::from_data(&context, data);
    second.make_shared().await.unwrap();
    second.save().await.unwrap();

    let first_log: Arc<Mutex<Vec<Field>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let log = first_log.clone();
        first.observe(move |field| log.lock().unwrap().push(field));
    }
    let second_log: Arc<Mutex<Vec<Field>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let log = second_log.clone();
        second.observe(move |field| log.lock().unwrap().push(field));
    }

    // Starting the entry that is already running changes nothing anywhere.
    first.set_running(true).await.unwrap();
    assert!(first.is_running());
    assert!(first.data().duration < 0);
    assert!(!second.is_running());
    assert!(first_log.lock().unwrap().is_empty());
    assert!(second_log.lock().unwrap().is_empty());

    // Starting the other entry hands the runner over and lands the old one
    // on a plain non-negative total.
    second.set_running(true).await.unwrap();
    second.save().await.unwrap();

    assert!(second.is_running());
    assert!(!first.is_running());
    assert!(first.data().duration >= 0);
    assert!(first.duration() >= 0);

    let rows = running_rows(&store, user_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id(), second.id());
}

#[tokio::test]
async fn deleted_entries_never_count_as_running() {
    let (store, context) = harness();
    let user_id = Uuid::new_v4();

    let first = TimeEntryModel::start_new(&context, user_id).await.unwrap();
    first.delete().await.unwrap();
    assert!(running_rows(&store, user_id).await.is_empty());

    // A running tombstone left behind by sync is ignored, not corrected.
    let mut ghost = running_payload(user_id);
    ghost.common.remote_id = Some(9);
    ghost.common.deleted_at = Some(Utc::now());
    let ghost = context.put_data(ghost).await.unwrap();

    let second = TimeEntryModel::start_new(&context, user_id).await.unwrap();
    assert!(second.is_running());

    let found = running_entry(&context, user_id).await.unwrap().unwrap();
    assert!(found.same_handle(&second));

    let ghost_id = ghost.common.id;
    let filter: RowFilter = Arc::new(move |row| row.id() == ghost_id);
    let rows = store
        .query(EntityKind::TimeEntry, filter, None, None)
        .await
        .unwrap();
    let ghost_row = rows[0].expect_kind::<TimeEntryData>().unwrap();
    assert!(ghost_row.running);
    assert!(ghost_row.common.deleted_at.is_some());
}
