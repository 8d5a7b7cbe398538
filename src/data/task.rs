use crate::core::{CommonFields, EntityKind, Field};
use crate::data::{ChangePayload, Entity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod fields {
    use crate::core::Field;

    pub const NAME: Field = "name";
    pub const PROJECT_ID: Field = "project_id";
    pub const WORKSPACE_ID: Field = "workspace_id";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub common: CommonFields,
    pub name: String,
    pub project_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
}

impl TaskData {
    pub fn new() -> Self {
        Self {
            common: CommonFields::new(),
            name: String::new(),
            project_id: None,
            workspace_id: None,
        }
    }
}

impl Default for TaskData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Entity for TaskData {
    const KIND: EntityKind = EntityKind::Task;

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
        if old.name != new.name {
            changed.push(fields::NAME);
        }
        if old.project_id != new.project_id {
            changed.push(fields::PROJECT_ID);
        }
        if old.workspace_id != new.workspace_id {
            changed.push(fields::WORKSPACE_ID);
        }
        changed
    }

    fn into_change(self) -> ChangePayload {
        ChangePayload::Task(self)
    }

    fn from_change(change: &ChangePayload) -> Option<Self> {
        match change {
            ChangePayload::Task(data) => Some(data.clone()),
            _ => None,
        }
    }
}
