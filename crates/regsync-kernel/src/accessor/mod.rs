//! Registry Accessor
//!
//! Thin, blocking adapter over a registry backend. Every call addresses one
//! `(view, hive, subkey)` location and is atomic on its own: a value write
//! is either fully visible or not at all.
//!
//! Backends:
//! - [`MemoryRegistry`]: in-process simulation with a configurable host
//!   architecture, used by tests and by the CLI's `memory` backend
//! - `WindowsRegistry`: the Win32 registry API (Windows only)
//!
//! [`BoundedAccessor`] wraps any backend and puts a timeout on each call.
//!
//! On a 32-bit host every backend serves REDIRECTED32 requests from the
//! native view instead of failing.

mod bounded;
pub mod codec;
mod memory;
#[cfg(windows)]
pub(crate) mod windows;

pub use bounded::BoundedAccessor;
pub use memory::{KeySnapshot, MemoryRegistry, RegistrySnapshot};
#[cfg(windows)]
pub use windows::WindowsRegistry;

use crate::error::AccessError;
use crate::path::{HostArch, RegistryPath};
use crate::types::{ValueData, ValueName};

/// Blocking registry operations scoped to a view
pub trait RegistryAccessor: Send + Sync + std::fmt::Debug {
    /// Architecture of the registry behind this accessor
    fn host_arch(&self) -> HostArch;

    /// Whether the key exists; hive roots always do
    fn exists(&self, path: &RegistryPath) -> Result<bool, AccessError>;

    /// Create the key and any missing intermediate keys
    fn create(&self, path: &RegistryPath) -> Result<(), AccessError>;

    /// Delete the key; without `recursive` this fails when subkeys exist
    fn delete(&self, path: &RegistryPath, recursive: bool) -> Result<(), AccessError>;

    /// Names of the direct subkeys
    fn list_subkeys(&self, path: &RegistryPath) -> Result<Vec<String>, AccessError>;

    /// Every value directly inside the key, default value included
    fn list_values(&self, path: &RegistryPath) -> Result<Vec<(ValueName, ValueData)>, AccessError>;

    /// Names of the values directly inside the key
    ///
    /// Backends that can enumerate names without decoding data should
    /// override this; purge only needs names.
    fn list_value_names(&self, path: &RegistryPath) -> Result<Vec<ValueName>, AccessError> {
        Ok(self
            .list_values(path)?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    /// Read one value; `NotFound` when the value or its key is missing
    fn get_value(&self, path: &RegistryPath, name: &ValueName) -> Result<ValueData, AccessError>;

    /// Write one value; `NotFound` when the key is missing
    fn set_value(
        &self,
        path: &RegistryPath,
        name: &ValueName,
        data: &ValueData,
    ) -> Result<(), AccessError>;

    /// Remove one value; `NotFound` when it is already gone
    fn delete_value(&self, path: &RegistryPath, name: &ValueName) -> Result<(), AccessError>;
}

/// `Key\Name` location string used in error messages
pub(crate) fn value_location(path: &RegistryPath, name: &ValueName) -> String {
    if name.is_default() {
        format!("{path}\\(default)")
    } else {
        format!("{path}\\{name}")
    }
}
