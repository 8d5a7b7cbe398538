use crate::core::{CommonFields, EntityKind, Field};
use crate::data::{ChangePayload, Entity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod fields {
    use crate::core::Field;

    pub const NAME: Field = "name";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceData {
    pub common: CommonFields,
    pub name: String,
}

impl WorkspaceData {
    pub fn new() -> Self {
        Self {
            common: CommonFields::new(),
            name: String::new(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            common: CommonFields::new(),
            name: name.into(),
        }
    }
}

impl Default for WorkspaceData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Entity for WorkspaceData {
    const KIND: EntityKind = EntityKind::Workspace;

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
        changed
    }

    fn into_change(self) -> ChangePayload {
        ChangePayload::Workspace(self)
    }

    fn from_change(change: &ChangePayload) -> Option<Self> {
        match change {
            ChangePayload::Workspace(data) => Some(data.clone()),
            _ => None,
        }
    }
}
