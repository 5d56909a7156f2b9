//! In-memory registry backend

use super::{value_location, RegistryAccessor};
use crate::error::{AccessError, ParseError};
use crate::path::{HostArch, PathResolver, RegistryPath, View};
use crate::types::{ValueData, ValueName};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct KeyEntry {
    values: BTreeMap<ValueName, ValueData>,
}

/// Simulated registry with separate native and redirected views
///
/// Hive roots always exist. On an [`HostArch::X86`] host both views share
/// one tree, mirroring a 32-bit Windows install.
#[derive(Debug)]
pub struct MemoryRegistry {
    host: HostArch,
    keys: RwLock<BTreeMap<RegistryPath, KeyEntry>>,
}

impl MemoryRegistry {
    /// Empty registry for the given host
    #[must_use]
    pub fn new(host: HostArch) -> Self {
        Self {
            host,
            keys: RwLock::new(BTreeMap::new()),
        }
    }

    /// Rebuild a registry from a serialized snapshot
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Result<Self, ParseError> {
        let registry = Self::new(snapshot.host);
        let resolver = PathResolver::new(snapshot.host, View::Native);
        {
            let mut keys = registry.keys.write();
            for key in &snapshot.keys {
                let path = resolver.parse(&key.path)?;
                insert_with_ancestors(&mut keys, &path);
                let entry = keys.entry(path).or_default();
                for (name, data) in &key.values {
                    entry.values.insert(ValueName::new(name.as_str()), data.clone());
                }
            }
        }
        Ok(registry)
    }

    /// Serializable copy of the current contents
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let keys = self
            .keys
            .read()
            .iter()
            .map(|(path, entry)| KeySnapshot {
                path: path.to_string(),
                values: entry
                    .values
                    .iter()
                    .map(|(name, data)| (name.as_str().to_string(), data.clone()))
                    .collect(),
            })
            .collect();
        RegistrySnapshot {
            host: self.host,
            keys,
        }
    }

    /// Number of keys stored, hive roots excluded
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys
            .read()
            .keys()
            .filter(|path| !path.is_hive_root())
            .count()
    }

    fn scope(&self, path: &RegistryPath) -> RegistryPath {
        if self.host.has_redirected_view() || path.view() == View::Native {
            path.clone()
        } else {
            path.with_view(View::Native)
        }
    }

    fn contains(keys: &BTreeMap<RegistryPath, KeyEntry>, path: &RegistryPath) -> bool {
        path.is_hive_root() || keys.contains_key(path)
    }
}

fn insert_with_ancestors(keys: &mut BTreeMap<RegistryPath, KeyEntry>, path: &RegistryPath) {
    for ancestor in path.ancestors() {
        keys.entry(ancestor).or_default();
    }
    if !path.is_hive_root() {
        keys.entry(path.clone()).or_default();
    }
}

impl RegistryAccessor for MemoryRegistry {
    fn host_arch(&self) -> HostArch {
        self.host
    }

    fn exists(&self, path: &RegistryPath) -> Result<bool, AccessError> {
        let path = self.scope(path);
        Ok(Self::contains(&self.keys.read(), &path))
    }

    fn create(&self, path: &RegistryPath) -> Result<(), AccessError> {
        let path = self.scope(path);
        if path.is_hive_root() {
            return Err(AccessError::HiveRoot(path.to_string()));
        }
        insert_with_ancestors(&mut self.keys.write(), &path);
        Ok(())
    }

    fn delete(&self, path: &RegistryPath, recursive: bool) -> Result<(), AccessError> {
        let path = self.scope(path);
        if path.is_hive_root() {
            return Err(AccessError::HiveRoot(path.to_string()));
        }

        let mut keys = self.keys.write();
        if !keys.contains_key(&path) {
            return Err(AccessError::NotFound(path.to_string()));
        }

        let descendants: Vec<RegistryPath> = keys
            .keys()
            .filter(|candidate| path.is_ancestor_of(candidate))
            .cloned()
            .collect();
        if !descendants.is_empty() && !recursive {
            return Err(AccessError::NotEmpty(path.to_string()));
        }

        for descendant in descendants {
            keys.remove(&descendant);
        }
        keys.remove(&path);
        Ok(())
    }

    fn list_subkeys(&self, path: &RegistryPath) -> Result<Vec<String>, AccessError> {
        let path = self.scope(path);
        let keys = self.keys.read();
        if !Self::contains(&keys, &path) {
            return Err(AccessError::NotFound(path.to_string()));
        }
        Ok(keys
            .keys()
            .filter(|candidate| candidate.parent().as_ref() == Some(&path))
            .filter_map(|child| child.leaf().map(str::to_string))
            .collect())
    }

    fn list_values(&self, path: &RegistryPath) -> Result<Vec<(ValueName, ValueData)>, AccessError> {
        let path = self.scope(path);
        let keys = self.keys.read();
        if !Self::contains(&keys, &path) {
            return Err(AccessError::NotFound(path.to_string()));
        }
        Ok(keys
            .get(&path)
            .map(|entry| {
                entry
                    .values
                    .iter()
                    .map(|(name, data)| (name.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_value(&self, path: &RegistryPath, name: &ValueName) -> Result<ValueData, AccessError> {
        let path = self.scope(path);
        self.keys
            .read()
            .get(&path)
            .and_then(|entry| entry.values.get(name))
            .cloned()
            .ok_or_else(|| AccessError::NotFound(value_location(&path, name)))
    }

    fn set_value(
        &self,
        path: &RegistryPath,
        name: &ValueName,
        data: &ValueData,
    ) -> Result<(), AccessError> {
        let path = self.scope(path);
        let mut keys = self.keys.write();
        if !Self::contains(&keys, &path) {
            return Err(AccessError::NotFound(path.to_string()));
        }
        keys.entry(path)
            .or_default()
            .values
            .insert(name.clone(), data.clone());
        Ok(())
    }

    fn delete_value(&self, path: &RegistryPath, name: &ValueName) -> Result<(), AccessError> {
        let path = self.scope(path);
        self.keys
            .write()
            .get_mut(&path)
            .and_then(|entry| entry.values.remove(name))
            .map(|_| ())
            .ok_or_else(|| AccessError::NotFound(value_location(&path, name)))
    }
}

/// Serialized registry contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub host: HostArch,
    #[serde(default)]
    pub keys: Vec<KeySnapshot>,
}

/// One key and its values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub path: String,
    #[serde(default)]
    pub values: BTreeMap<String, ValueData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> RegistryPath {
        raw.parse().unwrap()
    }

    #[test]
    fn create_adds_missing_intermediates() {
        let registry = MemoryRegistry::new(HostArch::X64);
        registry.create(&path(r"HKLM\Software\Vendor\T1\Sub")).unwrap();

        assert!(registry.exists(&path(r"HKLM\Software\Vendor")).unwrap());
        assert!(registry.exists(&path(r"hklm\software\vendor\t1\sub")).unwrap());
        assert_eq!(
            registry.list_subkeys(&path(r"HKLM\Software\Vendor")).unwrap(),
            ["T1"]
        );
    }

    #[test]
    fn hive_roots_exist_but_cannot_be_mutated() {
        let registry = MemoryRegistry::new(HostArch::X64);
        assert!(registry.exists(&path("HKCU")).unwrap());
        assert!(matches!(
            registry.create(&path("HKCU")),
            Err(AccessError::HiveRoot(_))
        ));
        assert!(matches!(
            registry.delete(&path("HKCU"), true),
            Err(AccessError::HiveRoot(_))
        ));
    }

    #[test]
    fn non_recursive_delete_refuses_keys_with_subkeys() {
        let registry = MemoryRegistry::new(HostArch::X64);
        registry.create(&path(r"HKLM\Software\A\B")).unwrap();

        assert!(matches!(
            registry.delete(&path(r"HKLM\Software\A"), false),
            Err(AccessError::NotEmpty(_))
        ));
        registry.delete(&path(r"HKLM\Software\A"), true).unwrap();
        assert!(!registry.exists(&path(r"HKLM\Software\A\B")).unwrap());
        assert!(registry.exists(&path(r"HKLM\Software")).unwrap());
    }

    #[test]
    fn value_round_trip_and_not_found() {
        let registry = MemoryRegistry::new(HostArch::X64);
        let key = path(r"HKLM\Software\A");
        let name = ValueName::new("Setting");

        assert!(registry
            .set_value(&key, &name, &ValueData::Dword(1))
            .unwrap_err()
            .is_not_found());

        registry.create(&key).unwrap();
        registry.set_value(&key, &name, &ValueData::Dword(1)).unwrap();
        assert_eq!(
            registry.get_value(&key, &ValueName::new("SETTING")).unwrap(),
            ValueData::Dword(1)
        );

        registry.delete_value(&key, &name).unwrap();
        assert!(registry.delete_value(&key, &name).unwrap_err().is_not_found());
        assert!(registry.get_value(&key, &name).unwrap_err().is_not_found());
    }

    #[test]
    fn redirected_view_is_separate_on_x64() {
        let registry = MemoryRegistry::new(HostArch::X64);
        registry.create(&path(r"32:HKLM\Software\Foo")).unwrap();
        assert!(!registry.exists(&path(r"HKLM\Software\Foo")).unwrap());
        assert!(registry.exists(&path(r"32:HKLM\Software\Foo")).unwrap());
    }

    #[test]
    fn redirected_view_is_served_natively_on_x86() {
        let registry = MemoryRegistry::new(HostArch::X86);
        registry.create(&path(r"32:HKLM\Software\Foo")).unwrap();
        assert!(registry.exists(&path(r"HKLM\Software\Foo")).unwrap());
        assert_eq!(registry.key_count(), 2);
    }

    #[test]
    fn snapshot_restores_contents() {
        let registry = MemoryRegistry::new(HostArch::X64);
        let key = path(r"32:HKLM\Software\Foo");
        registry.create(&key).unwrap();
        registry
            .set_value(&key, &ValueName::default_value(), &ValueData::String("d".into()))
            .unwrap();

        let restored = MemoryRegistry::from_snapshot(&registry.snapshot()).unwrap();
        assert_eq!(restored.snapshot(), registry.snapshot());
        assert_eq!(
            restored.get_value(&key, &ValueName::default_value()).unwrap(),
            ValueData::String("d".into())
        );
    }
}
