use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a payload field, raised through property-change notifications.
///
/// Compile-time constants instead of reflected property names: every payload
/// module exposes a `fields` submodule with one constant per field.
pub type Field = &'static str;

/// The closed set of entity kinds this layer manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    TimeEntry,
    Workspace,
    Project,
    Task,
    User,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::TimeEntry,
        EntityKind::Workspace,
        EntityKind::Project,
        EntityKind::Task,
        EntityKind::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::TimeEntry => "time_entry",
            EntityKind::Workspace => "workspace",
            EntityKind::Project => "project",
            EntityKind::Task => "task",
            EntityKind::User => "user",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a row, as announced on the change bus.
/// `Put` covers both create and update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataAction {
    Put,
    Delete,
}

/// Names of the fields every payload shares through [`CommonFields`].
pub mod fields {
    use super::Field;

    pub const ID: Field = "id";
    pub const REMOTE_ID: Field = "remote_id";
    pub const IS_DIRTY: Field = "is_dirty";
    pub const DELETED_AT: Field = "deleted_at";
    pub const MODIFIED_AT: Field = "modified_at";
    pub const REMOTE_REJECTED: Field = "remote_rejected";
}

/// Bookkeeping fields embedded in every payload.
///
/// A nil `id` means the row was never stored locally; `remote_id` stays
/// `None` until the first successful upload, which is what decides between
/// hard and soft deletion. `deleted_at` is the soft-delete tombstone: rows
/// carrying it stay in the store for the sync layer but never resurface
/// through entity loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonFields {
    pub id: Uuid,
    pub remote_id: Option<u64>,
    pub is_dirty: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub modified_at: DateTime<Utc>,
    pub remote_rejected: bool,
}

impl CommonFields {
    pub fn new() -> Self {
        Self {
            id: Uuid::nil(),
            remote_id: None,
            is_dirty: false,
            deleted_at: None,
            modified_at: Utc::now(),
            remote_rejected: false,
        }
    }

    pub fn is_persisted(&self) -> bool {
        !self.id.is_nil()
    }

    /// Records a local mutation: dirty for the next sync round, touched now,
    /// and any earlier remote rejection is considered stale.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
        self.modified_at = Utc::now();
        self.remote_rejected = false;
    }

    pub fn diff(old: &Self, new: &Self) -> Vec<Field> {
        let mut changed = Vec::new();
        if old.id != new.id {
            changed.push(fields::ID);
        }
        if old.remote_id != new.remote_id {
            changed.push(fields::REMOTE_ID);
        }
        if old.is_dirty != new.is_dirty {
            changed.push(fields::IS_DIRTY);
        }
        if old.deleted_at != new.deleted_at {
            changed.push(fields::DELETED_AT);
        }
        if old.modified_at != new.modified_at {
            changed.push(fields::MODIFIED_AT);
        }
        if old.remote_rejected != new.remote_rejected {
            changed.push(fields::REMOTE_REJECTED);
        }
        changed
    }
}

impl Default for CommonFields {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_common_fields_are_unsaved() {
        let common = CommonFields::new();
        assert!(common.id.is_nil());
        assert!(!common.is_persisted());
        assert!(common.remote_id.is_none());
        assert!(!common.is_dirty);
    }

    #[test]
    fn mark_dirty_touches_and_clears_rejection() {
        let mut common = CommonFields::new();
        common.remote_rejected = true;
        let before = common.modified_at;

        common.mark_dirty();

        assert!(common.is_dirty);
        assert!(!common.remote_rejected);
        assert!(common.modified_at >= before);
    }

    #[test]
    fn diff_reports_each_changed_field() {
        let old = CommonFields::new();
        let mut new = old.clone();
        new.id = Uuid::new_v4();
        new.remote_id = Some(7);
        new.deleted_at = Some(Utc::now());

        let changed = CommonFields::diff(&old, &new);

        assert_eq!(changed, vec![fields::ID, fields::REMOTE_ID, fields::DELETED_AT]);
    }

    #[test]
    fn diff_of_identical_payloads_is_empty() {
        let common = CommonFields::new();
        assert!(CommonFields::diff(&common, &common.clone()).is_empty());
    }
}
