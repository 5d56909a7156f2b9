//! Testing utilities for the regsync workspace
//!
//! Declaration builders, a fault-injecting registry wrapper and a helper
//! that runs a full reconciliation.

#![allow(missing_docs)]

use parking_lot::Mutex;
use regsync_kernel::accessor::{MemoryRegistry, RegistryAccessor};
use regsync_kernel::config::RunConfig;
use regsync_kernel::path::{HostArch, RegistryPath};
use regsync_kernel::reconciler::Reconciler;
use regsync_kernel::report::Report;
use regsync_kernel::{
    AccessError, KeyResource, PlanError, Resource, ResourceId, ValueData, ValueName, ValueResource,
};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Parse a path on a 64-bit host with the native default view
pub fn key(raw: &str) -> RegistryPath {
    raw.parse().unwrap()
}

pub fn key_id(raw: &str) -> ResourceId {
    ResourceId::Key(key(raw))
}

pub fn value_id(raw_key: &str, name: &str) -> ResourceId {
    ResourceId::Value {
        key: key(raw_key),
        name: ValueName::new(name),
    }
}

pub fn key_present(raw: &str) -> Resource {
    KeyResource::present(key(raw)).into()
}

pub fn key_absent(raw: &str) -> Resource {
    KeyResource::absent(key(raw)).into()
}

pub fn purged_key(raw: &str) -> Resource {
    KeyResource::present(key(raw)).with_purge_values(true).into()
}

pub fn value_present(raw_key: &str, name: &str, data: ValueData) -> Resource {
    ValueResource::present(key(raw_key), name, data).into()
}

pub fn value_absent(raw_key: &str, name: &str) -> Resource {
    ValueResource::absent(key(raw_key), name).into()
}

pub fn string(s: &str) -> ValueData {
    ValueData::String(s.to_string())
}

/// Memory registry pre-populated with `values` under `raw_key`
pub fn seeded_registry(
    host: HostArch,
    raw_key: &str,
    values: &[(&str, ValueData)],
) -> Arc<MemoryRegistry> {
    let registry = Arc::new(MemoryRegistry::new(host));
    let path = key(raw_key);
    registry.create(&path).unwrap();
    for (name, data) in values {
        registry.set_value(&path, &ValueName::new(*name), data).unwrap();
    }
    registry
}

/// Plan and apply with the given accessor
pub async fn reconcile(
    accessor: Arc<dyn RegistryAccessor>,
    config: RunConfig,
    resources: Vec<Resource>,
) -> Result<Report, PlanError> {
    Reconciler::new(accessor, config).apply(resources).await
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Accessor operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Exists,
    Create,
    Delete,
    ListSubkeys,
    ListValues,
    GetValue,
    SetValue,
    DeleteValue,
}

impl Op {
    pub fn is_mutation(self) -> bool {
        matches!(self, Op::Create | Op::Delete | Op::SetValue | Op::DeleteValue)
    }
}

#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with an OS access-denied error
    Deny,
    /// Block the calling thread before forwarding the call
    Delay(Duration),
    /// Report the stored data as a registry type nothing decodes
    Undecodable,
}

/// One recorded accessor call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    /// Key path the call addressed
    pub key: RegistryPath,
    /// Value name for value operations
    pub name: Option<String>,
}

/// Memory registry wrapper that records calls and injects faults
#[derive(Debug)]
pub struct FaultyRegistry {
    inner: Arc<MemoryRegistry>,
    faults: Mutex<Vec<(Op, RegistryPath, Fault)>>,
    calls: Mutex<Vec<Call>>,
}

impl FaultyRegistry {
    pub fn new(inner: Arc<MemoryRegistry>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Inject `fault` into every `op` call addressing `key`
    pub fn inject(self, op: Op, key: RegistryPath, fault: Fault) -> Self {
        self.faults.lock().push((op, key, fault));
        self
    }

    pub fn inner(&self) -> &Arc<MemoryRegistry> {
        &self.inner
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Recorded create/delete/set/delete-value calls, in call order
    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|call| call.op.is_mutation()).collect()
    }

    fn enter(
        &self,
        op: Op,
        key: &RegistryPath,
        name: Option<&ValueName>,
    ) -> Result<(), AccessError> {
        self.calls.lock().push(Call {
            op,
            key: key.clone(),
            name: name.map(|n| n.as_str().to_string()),
        });

        let fault = self
            .faults
            .lock()
            .iter()
            .find(|(fault_op, fault_key, _)| *fault_op == op && fault_key == key)
            .map(|(_, _, fault)| fault.clone());
        match fault {
            Some(Fault::Deny) => Err(AccessError::Os {
                location: key.to_string(),
                code: 5,
                message: "Access is denied.".to_string(),
            }),
            Some(Fault::Delay(delay)) => {
                std::thread::sleep(delay);
                Ok(())
            }
            Some(Fault::Undecodable) => Err(AccessError::InvalidData {
                location: key.to_string(),
                raw_type: 10,
            }),
            None => Ok(()),
        }
    }
}

impl RegistryAccessor for FaultyRegistry {
    fn host_arch(&self) -> HostArch {
        self.inner.host_arch()
    }

    fn exists(&self, path: &RegistryPath) -> Result<bool, AccessError> {
        self.enter(Op::Exists, path, None)?;
        self.inner.exists(path)
    }

    fn create(&self, path: &RegistryPath) -> Result<(), AccessError> {
        self.enter(Op::Create, path, None)?;
        self.inner.create(path)
    }

    fn delete(&self, path: &RegistryPath, recursive: bool) -> Result<(), AccessError> {
        self.enter(Op::Delete, path, None)?;
        self.inner.delete(path, recursive)
    }

    fn list_subkeys(&self, path: &RegistryPath) -> Result<Vec<String>, AccessError> {
        self.enter(Op::ListSubkeys, path, None)?;
        self.inner.list_subkeys(path)
    }

    fn list_values(&self, path: &RegistryPath) -> Result<Vec<(ValueName, ValueData)>, AccessError> {
        self.enter(Op::ListValues, path, None)?;
        self.inner.list_values(path)
    }

    fn get_value(&self, path: &RegistryPath, name: &ValueName) -> Result<ValueData, AccessError> {
        self.enter(Op::GetValue, path, Some(name))?;
        self.inner.get_value(path, name)
    }

    fn set_value(
        &self,
        path: &RegistryPath,
        name: &ValueName,
        data: &ValueData,
    ) -> Result<(), AccessError> {
        self.enter(Op::SetValue, path, Some(name))?;
        self.inner.set_value(path, name, data)
    }

    fn delete_value(&self, path: &RegistryPath, name: &ValueName) -> Result<(), AccessError> {
        self.enter(Op::DeleteValue, path, Some(name))?;
        self.inner.delete_value(path, name)
    }
}
