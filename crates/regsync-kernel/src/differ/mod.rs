//! State differ
//!
//! Compares one declared resource with the registry and yields the minimal
//! [`Step`] that converges it. Reads only; nothing is mutated here.

use crate::accessor::RegistryAccessor;
use crate::declaration::DeclarationSet;
use crate::error::{AccessError, ActionError};
use crate::types::{Ensure, KeyResource, Operation, Resource, ValueResource};
use tracing::debug;

/// What a plan node has to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Already converged
    InSync,
    /// Mutation to apply
    Apply(Operation),
    /// Diffing failed; the node fails without running
    Failed(ActionError),
}

impl Step {
    #[inline]
    #[must_use]
    pub fn operation(&self) -> Option<&Operation> {
        match self {
            Step::Apply(operation) => Some(operation),
            _ => None,
        }
    }
}

/// Diff one resource against the registry
pub fn diff(
    accessor: &dyn RegistryAccessor,
    resource: &Resource,
    declarations: &DeclarationSet,
) -> Step {
    let step = match resource {
        Resource::Key(key) => diff_key(accessor, key),
        Resource::Value(value) => diff_value(accessor, value, declarations),
    };
    debug!(id = %resource.id(), ?step, "diffed");
    step
}

fn diff_key(accessor: &dyn RegistryAccessor, key: &KeyResource) -> Step {
    let exists = match accessor.exists(&key.path) {
        Ok(exists) => exists,
        Err(e) => return Step::Failed(e.into()),
    };
    match (key.ensure, exists) {
        (Ensure::Present, false) => Step::Apply(Operation::CreateKey),
        (Ensure::Absent, true) => Step::Apply(Operation::DeleteKey),
        _ => Step::InSync,
    }
}

fn diff_value(
    accessor: &dyn RegistryAccessor,
    value: &ValueResource,
    declarations: &DeclarationSet,
) -> Step {
    let actual = match accessor.get_value(&value.path, &value.name) {
        Ok(actual) => Some(actual),
        Err(AccessError::NotFound(_)) => None,
        // Stored under a type we cannot decode: never equal to desired data
        Err(AccessError::InvalidData { .. }) => {
            return match (value.ensure, &value.data) {
                (Ensure::Present, Some(data)) => Step::Apply(Operation::SetValue {
                    data: data.clone(),
                    previous: None,
                    replaces: true,
                }),
                _ => Step::Apply(Operation::DeleteValue),
            };
        }
        Err(e) => return Step::Failed(e.into()),
    };

    match (value.ensure, &value.data, actual) {
        (Ensure::Present, Some(desired), Some(actual)) if *desired == actual => Step::InSync,
        (Ensure::Present, Some(desired), Some(actual)) => Step::Apply(Operation::SetValue {
            data: desired.clone(),
            previous: Some(actual),
            replaces: true,
        }),
        (Ensure::Present, Some(desired), None) => {
            match owner_available(accessor, value, declarations) {
                Ok(true) => Step::Apply(Operation::SetValue {
                    data: desired.clone(),
                    previous: None,
                    replaces: false,
                }),
                Ok(false) => Step::Failed(ActionError::OwnerKeyMissing(value.path.to_string())),
                Err(e) => Step::Failed(e.into()),
            }
        }
        // Rejected while building the declaration set
        (Ensure::Present, None, _) => Step::InSync,
        (Ensure::Absent, _, Some(_)) => Step::Apply(Operation::DeleteValue),
        (Ensure::Absent, _, None) => Step::InSync,
    }
}

fn owner_available(
    accessor: &dyn RegistryAccessor,
    value: &ValueResource,
    declarations: &DeclarationSet,
) -> Result<bool, AccessError> {
    let declared = declarations
        .key(&value.path)
        .is_some_and(|key| key.ensure == Ensure::Present);
    Ok(declared || accessor.exists(&value.path)?)
}
