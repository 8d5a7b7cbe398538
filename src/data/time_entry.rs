use crate::core::{CommonFields, DataError, EntityKind, Field, Result};
use crate::data::{ChangePayload, Entity};
use crate::model::Model;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tag written into `created_with` when a payload reaches the store without
/// one, and stamped onto entries spawned by `continue_entry`.
pub const DEFAULT_CREATED_WITH: &str = "timeledger";

pub mod fields {
    use crate::core::Field;

    pub const DESCRIPTION: Field = "description";
    pub const BILLABLE: Field = "billable";
    pub const START_TIME: Field = "start_time";
    pub const STOP_TIME: Field = "stop_time";
    pub const DURATION: Field = "duration";
    pub const DURATION_ONLY: Field = "duration_only";
    pub const RUNNING: Field = "running";
    pub const CREATED_WITH: Field = "created_with";
    pub const WORKSPACE_ID: Field = "workspace_id";
    pub const PROJECT_ID: Field = "project_id";
    pub const TASK_ID: Field = "task_id";
    pub const USER_ID: Field = "user_id";
}

/// One tracked block of work.
///
/// `duration` carries the signed encoding: non-negative means completed
/// elapsed seconds, negative means the entry is running and `-duration` is
/// its virtual start in epoch seconds. The virtual start folds in any
/// seconds accumulated before the latest start, so live elapsed is always
/// `now + duration`. `running` is denormalized from the sign so predicates
/// and sync payloads never have to re-derive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntryData {
    pub common: CommonFields,
    pub description: String,
    pub billable: bool,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    pub duration: i64,
    pub duration_only: bool,
    pub running: bool,
    pub created_with: String,
    pub workspace_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

impl TimeEntryData {
    pub fn new() -> Self {
        Self {
            common: CommonFields::new(),
            description: String::new(),
            billable: false,
            start_time: Utc::now(),
            stop_time: None,
            duration: 0,
            duration_only: false,
            running: false,
            created_with: String::new(),
            workspace_id: None,
            project_id: None,
            task_id: None,
            user_id: None,
        }
    }

    /// Display duration at `now`: live elapsed for running entries, the
    /// stored total otherwise. Never mutates the encoding.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> i64 {
        decode_elapsed(self.duration, now)
    }
}

impl Default for TimeEntryData {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoding for an entry that starts running at `start` with nothing
/// accumulated yet. Decodes to `Δ` once `Δ` seconds have passed.
pub fn encode_running_since(start: DateTime<Utc>) -> i64 {
    -start.timestamp()
}

/// Elapsed seconds represented by a raw duration at `now`. Clamped at zero
/// so clock skew around a fresh start never shows a negative timer.
pub fn decode_elapsed(raw: i64, now: DateTime<Utc>) -> i64 {
    if raw < 0 {
        (now.timestamp() + raw).max(0)
    } else {
        raw
    }
}

#[async_trait]
impl Entity for TimeEntryData {
    const KIND: EntityKind = EntityKind::TimeEntry;

    fn fresh() -> Self {
        Self::new()
    }

    fn common(&self) -> &CommonFields {
        &self.common
    }

    fn common_mut(&mut self) -> &mut CommonFields {
        &mut self.common
    }

    fn diff(old: &Self, new: &Self) -> Vec<Field> {
        let mut changed = CommonFields::diff(&old.common, &new.common);
        if old.description != new.description {
            changed.push(fields::DESCRIPTION);
        }
        if old.billable != new.billable {
            changed.push(fields::BILLABLE);
        }
        if old.start_time != new.start_time {
            changed.push(fields::START_TIME);
        }
        if old.stop_time != new.stop_time {
            changed.push(fields::STOP_TIME);
        }
        if old.duration != new.duration {
            changed.push(fields::DURATION);
        }
        if old.duration_only != new.duration_only {
            changed.push(fields::DURATION_ONLY);
        }
        if old.running != new.running {
            changed.push(fields::RUNNING);
        }
        if old.created_with != new.created_with {
            changed.push(fields::CREATED_WITH);
        }
        if old.workspace_id != new.workspace_id {
            changed.push(fields::WORKSPACE_ID);
        }
        if old.project_id != new.project_id {
            changed.push(fields::PROJECT_ID);
        }
        if old.task_id != new.task_id {
            changed.push(fields::TASK_ID);
        }
        if old.user_id != new.user_id {
            changed.push(fields::USER_ID);
        }
        changed
    }

    fn into_change(self) -> ChangePayload {
        ChangePayload::TimeEntry(self)
    }

    fn from_change(change: &ChangePayload) -> Option<Self> {
        match change {
            ChangePayload::TimeEntry(data) => Some(data.clone()),
            _ => None,
        }
    }

    fn prepare_for_save(&mut self) -> Result<()> {
        if self.created_with.is_empty() {
            self.created_with = DEFAULT_CREATED_WITH.to_string();
        }
        if self.running {
            if self.user_id.is_none() {
                return Err(DataError::Validation(
                    "a running time entry must belong to a user".to_string(),
                ));
            }
            if self.common.deleted_at.is_some() {
                return Err(DataError::Validation(
                    "a soft-deleted time entry cannot be running".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn after_change(model: &Model<Self>, changed: &[Field]) -> Result<()> {
        crate::model::time_entry::maybe_enforce_single_running(model, changed).await
    }
}
