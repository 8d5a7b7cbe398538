use crate::core::{DataError, Field, Result, fields as common};
use crate::data::time_entry::{DEFAULT_CREATED_WITH, encode_running_since, fields};
use crate::data::{ChangePayload, ProjectData, TaskData, TimeEntryData, UserData, WorkspaceData};
use crate::model::{DataContext, IS_SHARED, Model};
use crate::store::{RowComparator, RowFilter};
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Envelope specialization for time entries: duration encoding transitions,
/// stop/continue, and the single-running-entry invariant.
pub type TimeEntryModel = Model<TimeEntryData>;

/// Field changes that can make an entry newly eligible for invariant
/// enforcement: becoming running, becoming shared, gaining an identity, or
/// a tombstone landing on it.
const ENFORCEMENT_TRIGGERS: [Field; 4] = [common::ID, common::DELETED_AT, fields::RUNNING, IS_SHARED];

impl Model<TimeEntryData> {
    /// Starts tracking a fresh running entry for `user_id`: shared, saved,
    /// and by the time this returns the only running entry for that user.
    pub async fn start_new(context: &DataContext, user_id: Uuid) -> Result<TimeEntryModel> {
        let now = Utc::now();
        let mut data = TimeEntryData::new();
        data.user_id = Some(user_id);
        data.start_time = now;
        data.duration = encode_running_since(now);
        data.running = true;

        let entry = Model::from_data(context, data);
        entry.make_shared().await?;
        entry.save().await?;
        Ok(entry)
    }

    pub async fn set_description(&self, value: impl Into<String> + Send) -> Result<()> {
        let value = value.into();
        self.mutate(|data| data.description = value).await
    }

    pub async fn set_billable(&self, value: bool) -> Result<()> {
        self.mutate(|data| data.billable = value).await
    }

    pub async fn set_duration_only(&self, value: bool) -> Result<()> {
        self.mutate(|data| data.duration_only = value).await
    }

    pub async fn set_created_with(&self, value: impl Into<String> + Send) -> Result<()> {
        let value = value.into();
        self.mutate(|data| data.created_with = value).await
    }

    pub async fn set_start_time(&self, value: DateTime<Utc>) -> Result<()> {
        self.mutate(|data| data.start_time = value).await
    }

    /// Setting a concrete stop always lands the entry stopped, folding the
    /// elapsed seconds up to `stop` into the stored total if it was
    /// running. Clearing the stop is a plain field write.
    pub async fn set_stop_time(&self, value: Option<DateTime<Utc>>) -> Result<()> {
        self.mutate(|data| {
            data.stop_time = value;
            if let Some(stop) = value {
                if data.duration < 0 {
                    data.duration = (stop.timestamp() + data.duration).max(0);
                }
                data.running = false;
            }
        })
        .await
    }

    /// Writes the raw encoding verbatim and re-derives the running flag
    /// from its sign.
    pub async fn set_raw_duration(&self, value: i64) -> Result<()> {
        self.mutate(|data| {
            data.duration = value;
            data.running = value < 0;
        })
        .await
    }

    /// Display-duration write: a running entry is re-based so its live
    /// elapsed reads `total_seconds` right now (and keeps counting), a
    /// stopped entry just stores the total.
    pub async fn set_duration(&self, total_seconds: i64) -> Result<()> {
        let now = Utc::now();
        self.mutate(|data| {
            if data.duration < 0 {
                data.duration = total_seconds - now.timestamp();
            } else {
                data.duration = total_seconds;
            }
            data.running = data.duration < 0;
        })
        .await
    }

    /// Flips the running state, converting the duration encoding in the
    /// same step: starting folds the accumulated total into a virtual
    /// start, stopping decodes the virtual start back into a total.
    /// Setting the current value is a no-op. Becoming running triggers
    /// single-running enforcement through the change hook.
    pub async fn set_running(&self, value: bool) -> Result<()> {
        let snapshot = self.data();
        if snapshot.running == value {
            return Ok(());
        }
        let now = Utc::now();
        self.mutate(|data| {
            data.running = value;
            if value {
                if data.duration >= 0 {
                    data.duration -= now.timestamp();
                }
                data.stop_time = None;
            } else if data.duration < 0 {
                data.duration = (now.timestamp() + data.duration).max(0);
            }
        })
        .await
    }

    /// Live display duration in seconds. Reading never mutates the
    /// encoding; a running entry keeps counting.
    pub fn duration(&self) -> i64 {
        self.data().elapsed_at(Utc::now())
    }

    pub fn is_running(&self) -> bool {
        self.data().running
    }

    pub async fn workspace(&self) -> Result<Option<Model<WorkspaceData>>> {
        let id = self.data().workspace_id;
        self.related::<WorkspaceData>(fields::WORKSPACE_ID, id).await
    }

    pub async fn set_workspace(&self, workspace: Option<&Model<WorkspaceData>>) -> Result<()> {
        self.set_related(fields::WORKSPACE_ID, workspace, |data, id| {
            data.workspace_id = id
        })
        .await
    }

    pub async fn project(&self) -> Result<Option<Model<ProjectData>>> {
        let id = self.data().project_id;
        self.related::<ProjectData>(fields::PROJECT_ID, id).await
    }

    pub async fn set_project(&self, project: Option<&Model<ProjectData>>) -> Result<()> {
        self.set_related(fields::PROJECT_ID, project, |data, id| data.project_id = id)
            .await
    }

    pub async fn task(&self) -> Result<Option<Model<TaskData>>> {
        let id = self.data().task_id;
        self.related::<TaskData>(fields::TASK_ID, id).await
    }

    pub async fn set_task(&self, task: Option<&Model<TaskData>>) -> Result<()> {
        self.set_related(fields::TASK_ID, task, |data, id| data.task_id = id)
            .await
    }

    pub async fn user(&self) -> Result<Option<Model<UserData>>> {
        let id = self.data().user_id;
        self.related::<UserData>(fields::USER_ID, id).await
    }

    pub async fn set_user(&self, user: Option<&Model<UserData>>) -> Result<()> {
        self.set_related(fields::USER_ID, user, |data, id| data.user_id = id)
            .await
    }

    /// Stops tracking: duration-only entries just flip the flag, wall-clock
    /// entries record the stop timestamp (which derives the rest).
    pub async fn stop(&self) -> Result<()> {
        self.ensure_shared_and_persisted()?;
        let snapshot = self.data();
        if snapshot.duration_only {
            self.set_running(false).await
        } else {
            self.set_stop_time(Some(Utc::now())).await
        }
    }

    /// Resumes work on this entry.
    ///
    /// A duration-only entry started today (local calendar) is flipped back
    /// to running in place, same identity, same handle. Anything else
    /// spawns a new entry copying the descriptive fields, starting now.
    /// Either way the invariant machinery stops whatever else was running.
    pub async fn continue_entry(&self) -> Result<TimeEntryModel> {
        self.ensure_shared_and_persisted()?;
        let snapshot = self.data();

        let today = Local::now().date_naive();
        if snapshot.duration_only && snapshot.start_time.with_timezone(&Local).date_naive() == today
        {
            self.set_running(true).await?;
            self.save().await?;
            return Ok(self.clone());
        }

        let now = Utc::now();
        let mut data = TimeEntryData::new();
        data.description = snapshot.description.clone();
        data.billable = snapshot.billable;
        data.duration_only = snapshot.duration_only;
        data.workspace_id = snapshot.workspace_id;
        data.project_id = snapshot.project_id;
        data.task_id = snapshot.task_id;
        data.user_id = snapshot.user_id;
        data.created_with = DEFAULT_CREATED_WITH.to_string();
        data.start_time = now;
        data.duration = encode_running_since(now);
        data.running = true;

        let entry = Model::from_data(self.context(), data);
        entry.make_shared().await?;
        entry.save().await?;
        Ok(entry)
    }

    fn ensure_shared_and_persisted(&self) -> Result<()> {
        if !self.is_shared() || !self.is_persisted() {
            return Err(DataError::InvalidOperation(
                "time entry must be shared and persisted".to_string(),
            ));
        }
        Ok(())
    }

    /// Stops every other running entry of the same user, first across live
    /// cached envelopes, then across store rows. The two passes are not
    /// atomic; the transient window is accepted. Store rows are mapped back
    /// to their live envelope when one exists, so this envelope's own row
    /// resolves to itself and the handle-identity exclusion holds.
    async fn enforce_single_running(&self, user_id: Uuid) -> Result<()> {
        debug!(entity_id = %self.id(), "enforcing single running time entry");

        for entry in self.context().cache().live::<TimeEntryData>()? {
            if entry.same_handle(self) {
                continue;
            }
            let data = entry.data();
            if data.user_id != Some(user_id) || !data.running {
                continue;
            }
            if entry.is_persisted() {
                stop_running(&entry).await?;
            } else {
                // A draft has no store row and no replicas to converge;
                // writing the flag is the whole correction. Saving it here
                // would force-persist it.
                entry.set_running(false).await?;
            }
        }

        let filter: RowFilter = Arc::new(move |row| match row {
            ChangePayload::TimeEntry(data) => {
                data.running && data.user_id == Some(user_id) && data.common.deleted_at.is_none()
            }
            _ => false,
        });
        let rows = self
            .context()
            .query_data::<TimeEntryData>(filter, None, None)
            .await?;
        for row in rows {
            let entry = attach(self.context(), row)?;
            if entry.same_handle(self) {
                continue;
            }
            if !entry.data().running {
                continue;
            }
            stop_running(&entry).await?;
        }
        Ok(())
    }
}

/// Runs single-running enforcement when a change made `model` eligible:
/// running and shared and persisted, with a user to key on. Invoked from
/// the time-entry `after_change` hook on every non-empty adoption diff.
pub(crate) async fn maybe_enforce_single_running(
    model: &TimeEntryModel,
    changed: &[Field],
) -> Result<()> {
    if !changed
        .iter()
        .any(|field| ENFORCEMENT_TRIGGERS.contains(field))
    {
        return Ok(());
    }
    let snapshot = model.data();
    if !snapshot.running || !model.is_shared() || !model.is_persisted() {
        return Ok(());
    }
    let Some(user_id) = snapshot.user_id else {
        return Ok(());
    };
    model.enforce_single_running(user_id).await
}

/// Corrections go through the normal mutate-and-save path so each one
/// republishes and converges any duplicate envelopes. A stopped entry can
/// never re-trigger enforcement, which is what terminates the cascade.
async fn stop_running(entry: &TimeEntryModel) -> Result<()> {
    entry.set_running(false).await?;
    entry.save().await
}

fn attach(context: &DataContext, data: TimeEntryData) -> Result<TimeEntryModel> {
    if let Some(live) = context.cache().find_by_id::<TimeEntryData>(data.common.id)? {
        return Ok(live);
    }
    Ok(Model::from_data(context, data))
}

/// Raises a `duration` notification on every running cached entry so
/// display observers re-read the live elapsed value. Pure notification, no
/// payload is touched. Returns how many entries were refreshed.
pub fn refresh_running_durations(context: &DataContext) -> Result<usize> {
    let mut refreshed = 0;
    for entry in context.cache().live::<TimeEntryData>()? {
        if entry.data().running {
            entry.notify_observers(&[fields::DURATION]);
            refreshed += 1;
        }
    }
    Ok(refreshed)
}

/// Periodic display refresh for running timers. Abort the handle to stop.
pub fn spawn_duration_refresh(context: &DataContext, every: Duration) -> JoinHandle<()> {
    let context = context.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match refresh_running_durations(&context) {
                Ok(count) => {
                    if count > 0 {
                        debug!(count, "refreshed running durations");
                    }
                }
                Err(err) => warn!(error = %err, "duration refresh failed"),
            }
        }
    })
}

/// The user's latest entries since `since`, newest first, at most `limit`.
/// Rows with a live cached envelope come back as that envelope.
pub async fn recent_entries(
    context: &DataContext,
    user_id: Uuid,
    since: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<TimeEntryModel>> {
    let filter: RowFilter = Arc::new(move |row| match row {
        ChangePayload::TimeEntry(data) => {
            data.common.deleted_at.is_none()
                && data.user_id == Some(user_id)
                && data.start_time >= since
        }
        _ => false,
    });
    let order: RowComparator = Arc::new(|a, b| match (a, b) {
        (ChangePayload::TimeEntry(x), ChangePayload::TimeEntry(y)) => {
            y.start_time.cmp(&x.start_time)
        }
        _ => std::cmp::Ordering::Equal,
    });

    let rows = context
        .query_data::<TimeEntryData>(filter, Some(order), Some(limit))
        .await?;
    rows.into_iter().map(|row| attach(context, row)).collect()
}

/// The user's currently running entry, if any.
pub async fn running_entry(context: &DataContext, user_id: Uuid) -> Result<Option<TimeEntryModel>> {
    let filter: RowFilter = Arc::new(move |row| match row {
        ChangePayload::TimeEntry(data) => {
            data.running && data.user_id == Some(user_id) && data.common.deleted_at.is_none()
        }
        _ => false,
    });
    let rows = context
        .query_data::<TimeEntryData>(filter, None, Some(1))
        .await?;
    match rows.into_iter().next() {
        None => Ok(None),
        Some(row) => attach(context, row).map(Some),
    }
}
