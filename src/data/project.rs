use crate::core::{CommonFields, EntityKind, Field};
use crate::data::{ChangePayload, Entity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod fields {
    use crate::core::Field;

    pub const NAME: Field = "name";
    pub const COLOR: Field = "color";
    pub const WORKSPACE_ID: Field = "workspace_id";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectData {
    pub common: CommonFields,
    pub name: String,
    pub color: i32,
    pub workspace_id: Option<Uuid>,
}

impl ProjectData {
    pub fn new() -> Self {
        Self {
            common: CommonFields::new(),
            name: String::new(),
            color: 0,
            workspace_id: None,
        }
    }
}

impl Default for ProjectData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Entity for ProjectData {
    const KIND: EntityKind = EntityKind::Project;

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
        if old.color != new.color {
            changed.push(fields::COLOR);
        }
        if old.workspace_id != new.workspace_id {
            changed.push(fields::WORKSPACE_ID);
        }
        changed
    }

    fn into_change(self) -> ChangePayload {
        ChangePayload::Project(self)
    }

    fn from_change(change: &ChangePayload) -> Option<Self> {
        match change {
            ChangePayload::Project(data) => Some(data.clone()),
            _ => None,
        }
    }
}
