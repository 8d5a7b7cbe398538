use crate::core::{CommonFields, DataError, EntityKind, Field, Result};
use crate::model::Model;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod project;
pub mod task;
pub mod time_entry;
pub mod user;
pub mod workspace;

pub use project::ProjectData;
pub use task::TaskData;
pub use time_entry::TimeEntryData;
pub use user::UserData;
pub use workspace::WorkspaceData;

/// Capability surface of one entity kind.
///
/// Payloads are plain records replaced wholesale: the envelope never mutates
/// a payload in place while it is shared, it clones, edits the clone, and
/// adopts the result. `diff` powers the per-field change notifications, the
/// `into_change`/`from_change` pair bridges to the kind-erased store seam,
/// and the two hooks let a kind validate before writes (`prepare_for_save`)
/// and react after adoptions (`after_change`).
#[async_trait]
pub trait Entity: Clone + Send + Sync + Sized + 'static {
    const KIND: EntityKind;

    /// A blank unsaved payload.
    fn fresh() -> Self;

    fn common(&self) -> &CommonFields;

    fn common_mut(&mut self) -> &mut CommonFields;

    /// Names of the fields that differ between two payloads, common fields
    /// included.
    fn diff(old: &Self, new: &Self) -> Vec<Field>;

    fn into_change(self) -> ChangePayload;

    /// `None` when the payload is of a different kind.
    fn from_change(change: &ChangePayload) -> Option<Self>;

    /// Normalize and validate just before a store write.
    fn prepare_for_save(&mut self) -> Result<()> {
        Ok(())
    }

    /// Invoked by the envelope after it adopted a payload whose diff was
    /// non-empty. This is where kind-specific invariants hook in.
    async fn after_change(_model: &Model<Self>, _changed: &[Field]) -> Result<()> {
        Ok(())
    }
}

/// Kind-erased payload, the unit the store and the change bus speak in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangePayload {
    TimeEntry(TimeEntryData),
    Workspace(WorkspaceData),
    Project(ProjectData),
    Task(TaskData),
    User(UserData),
}

impl ChangePayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            ChangePayload::TimeEntry(_) => EntityKind::TimeEntry,
            ChangePayload::Workspace(_) => EntityKind::Workspace,
            ChangePayload::Project(_) => EntityKind::Project,
            ChangePayload::Task(_) => EntityKind::Task,
            ChangePayload::User(_) => EntityKind::User,
        }
    }

    pub fn common(&self) -> &CommonFields {
        match self {
            ChangePayload::TimeEntry(data) => &data.common,
            ChangePayload::Workspace(data) => &data.common,
            ChangePayload::Project(data) => &data.common,
            ChangePayload::Task(data) => &data.common,
            ChangePayload::User(data) => &data.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut CommonFields {
        match self {
            ChangePayload::TimeEntry(data) => &mut data.common,
            ChangePayload::Workspace(data) => &mut data.common,
            ChangePayload::Project(data) => &mut data.common,
            ChangePayload::Task(data) => &mut data.common,
            ChangePayload::User(data) => &mut data.common,
        }
    }

    pub fn id(&self) -> Uuid {
        self.common().id
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.common().deleted_at
    }

    /// Typed extraction that errors instead of silently skipping, for seams
    /// where a kind mismatch means a bug rather than an uninteresting event.
    pub fn expect_kind<E: Entity>(&self) -> Result<E> {
        E::from_change(self).ok_or_else(|| {
            DataError::Store(format!(
                "expected a {} payload, got {}",
                E::KIND,
                self.kind()
            ))
        })
    }
}
