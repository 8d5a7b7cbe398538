use crate::core::{CommonFields, EntityKind, Field};
use crate::data::{ChangePayload, Entity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod fields {
    use crate::core::Field;

    pub const NAME: Field = "name";
    pub const DEFAULT_WORKSPACE_ID: Field = "default_workspace_id";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub common: CommonFields,
    pub name: String,
    pub default_workspace_id: Option<Uuid>,
}

impl UserData {
    pub fn new() -> Self {
        Self {
            common: CommonFields::new(),
            name: String::new(),
            default_workspace_id: None,
        }
    }
}

impl Default for UserData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Entity for UserData {
    const KIND: EntityKind = EntityKind::User;

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
        if old.default_workspace_id != new.default_workspace_id {
            changed.push(fields::DEFAULT_WORKSPACE_ID);
        }
        changed
    }

    fn into_change(self) -> ChangePayload {
        ChangePayload::User(self)
    }

    fn from_change(change: &ChangePayload) -> Option<Self> {
        match change {
            ChangePayload::User(data) => Some(data.clone()),
            _ => None,
        }
    }
}
