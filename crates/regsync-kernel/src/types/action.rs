use super::{ResourceId, ValueData};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};

/// Kind of registry mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateKey,
    DeleteKey,
    SetValue,
    DeleteValue,
}

impl ActionKind {
    /// Creates or writes something
    #[inline]
    #[must_use]
    pub fn is_creation(self) -> bool {
        matches!(self, ActionKind::CreateKey | ActionKind::SetValue)
    }

    /// Removes something
    #[inline]
    #[must_use]
    pub fn is_deletion(self) -> bool {
        matches!(self, ActionKind::DeleteKey | ActionKind::DeleteValue)
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionKind::CreateKey => "create_key",
            ActionKind::DeleteKey => "delete_key",
            ActionKind::SetValue => "set_value",
            ActionKind::DeleteValue => "delete_value",
        })
    }
}

/// Where an action came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// A declared resource
    #[default]
    Managed,
    /// An unmanaged value removed by purge
    Purge,
}

/// Mutation payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateKey,
    /// Always recursive: a key ensured absent goes with its whole subtree
    DeleteKey,
    SetValue {
        data: ValueData,
        /// Data found during diffing; `None` when missing or undecodable
        previous: Option<ValueData>,
        /// A value already exists under the name, decodable or not
        replaces: bool,
    },
    DeleteValue,
}

impl Operation {
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Operation::CreateKey => ActionKind::CreateKey,
            Operation::DeleteKey => ActionKind::DeleteKey,
            Operation::SetValue { .. } => ActionKind::SetValue,
            Operation::DeleteValue => ActionKind::DeleteValue,
        }
    }
}

/// A planned mutation of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub id: ResourceId,
    pub operation: Operation,
    pub origin: Origin,
}

impl Action {
    #[must_use]
    pub fn managed(id: ResourceId, operation: Operation) -> Self {
        Self {
            id,
            operation,
            origin: Origin::Managed,
        }
    }

    #[must_use]
    pub fn purge(id: ResourceId) -> Self {
        Self {
            id,
            operation: Operation::DeleteValue,
            origin: Origin::Purge,
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.operation.kind()
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id)?;
        if self.origin == Origin::Purge {
            f.write_str(" (purge)")?;
        }
        Ok(())
    }
}
