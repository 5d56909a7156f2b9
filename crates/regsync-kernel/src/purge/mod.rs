//! Purge engine
//!
//! For present keys with purge enabled, every value not declared under the
//! key is scheduled for deletion. The default value takes part like any
//! other name; subkeys are never touched.

use crate::accessor::RegistryAccessor;
use crate::declaration::DeclarationSet;
use crate::error::AccessError;
use crate::types::{Ensure, KeyResource, ResourceId, ValueName};
use std::collections::HashSet;
use tracing::debug;

/// Effective purge setting: the key's own flag, else the run default
#[inline]
#[must_use]
pub fn purge_enabled(key: &KeyResource, run_default: Option<bool>) -> bool {
    key.ensure == Ensure::Present && key.purge_values.or(run_default).unwrap_or(false)
}

/// Names in `actual` that are not declared
#[must_use]
pub fn unmanaged_values(actual: Vec<ValueName>, declared: &HashSet<ValueName>) -> Vec<ValueName> {
    actual
        .into_iter()
        .filter(|name| !declared.contains(name))
        .collect()
}

/// Value identities to delete under `key`
///
/// Only called for keys that already exist; a key created in this run has
/// no values to purge.
pub fn plan_purge(
    accessor: &dyn RegistryAccessor,
    key: &KeyResource,
    declarations: &DeclarationSet,
) -> Result<Vec<ResourceId>, AccessError> {
    let actual = match accessor.list_value_names(&key.path) {
        Ok(names) => names,
        Err(AccessError::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let declared = declarations.value_names_under(&key.path);
    let doomed: Vec<ResourceId> = unmanaged_values(actual, &declared)
        .into_iter()
        .map(|name| ResourceId::Value {
            key: key.path.clone(),
            name,
        })
        .collect();
    debug!(key = %key.path, count = doomed.len(), "purge candidates");
    Ok(doomed)
}
