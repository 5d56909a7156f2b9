//! Declared resources and their identities

mod action;

pub use action::{Action, ActionKind, Operation, Origin};

use crate::path::RegistryPath;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

/// Target existence state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// Typed value payload
///
/// Equality is exact: the type tag must match, strings compare
/// case-sensitively, binary compares byte for byte and multi-strings compare
/// element-wise in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ValueData {
    String(String),
    ExpandString(String),
    Dword(u32),
    Qword(u64),
    Binary(Vec<u8>),
    MultiString(Vec<String>),
}

impl ValueData {
    /// Registry type name (`REG_SZ`, `REG_DWORD`, ...)
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueData::String(_) => "REG_SZ",
            ValueData::ExpandString(_) => "REG_EXPAND_SZ",
            ValueData::Dword(_) => "REG_DWORD",
            ValueData::Qword(_) => "REG_QWORD",
            ValueData::Binary(_) => "REG_BINARY",
            ValueData::MultiString(_) => "REG_MULTI_SZ",
        }
    }
}

impl Display for ValueData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValueData::String(s) | ValueData::ExpandString(s) => write!(f, "'{s}'"),
            ValueData::Dword(n) => write!(f, "{n}"),
            ValueData::Qword(n) => write!(f, "{n}"),
            ValueData::Binary(bytes) => {
                let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
                write!(f, "[{}]", hex.join(" "))
            }
            ValueData::MultiString(items) => {
                let quoted: Vec<String> = items.iter().map(|s| format!("'{s}'")).collect();
                write!(f, "[{}]", quoted.join(", "))
            }
        }
    }
}

/// Name of a value inside a key; compares case-insensitively
///
/// The empty name is the key's unnamed default value.
#[derive(Debug, Clone, Default)]
pub struct ValueName {
    name: String,
    folded: String,
}

impl ValueName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let folded = name.to_lowercase();
        Self { name, folded }
    }

    /// The unnamed default value
    #[inline]
    #[must_use]
    pub fn default_value() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }

    /// Name as declared
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl PartialEq for ValueName {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for ValueName {}

impl Hash for ValueName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl PartialOrd for ValueName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded.cmp(&other.folded)
    }
}

impl Display for ValueName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for ValueName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identity of a managed resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    Key(RegistryPath),
    Value { key: RegistryPath, name: ValueName },
}

impl ResourceId {
    /// Key the resource lives in (the key itself for key resources)
    #[inline]
    #[must_use]
    pub fn key_path(&self) -> &RegistryPath {
        match self {
            ResourceId::Key(path) => path,
            ResourceId::Value { key, .. } => key,
        }
    }

    /// Resource type label used in reports and references
    #[inline]
    #[must_use]
    pub fn type_label(&self) -> &'static str {
        match self {
            ResourceId::Key(_) => "Registry_key",
            ResourceId::Value { .. } => "Registry_value",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_key(&self) -> bool {
        matches!(self, ResourceId::Key(_))
    }

    /// Label for resources discovered by purging: canonical lowercase hive
    #[must_use]
    pub fn unmanaged_label(&self) -> String {
        match self {
            ResourceId::Key(path) => format!("Registry_key[{}]", path.canonical()),
            ResourceId::Value { key, name } if name.is_default() => {
                format!("Registry_value[{}\\\\]", key.canonical())
            }
            ResourceId::Value { key, name } => {
                format!("Registry_value[{}\\{name}]", key.canonical())
            }
        }
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Key(path) => write!(f, "Registry_key[{path}]"),
            // The default value renders as `Key\\`
            ResourceId::Value { key, name } if name.is_default() => {
                write!(f, "Registry_value[{key}\\\\]")
            }
            ResourceId::Value { key, name } => write!(f, "Registry_value[{key}\\{name}]"),
        }
    }
}

impl Serialize for ResourceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Desired state of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyResource {
    pub path: RegistryPath,
    pub ensure: Ensure,
    /// `None` follows the run default
    pub purge_values: Option<bool>,
    pub depends_on: Vec<ResourceId>,
}

impl KeyResource {
    #[must_use]
    pub fn present(path: RegistryPath) -> Self {
        Self {
            path,
            ensure: Ensure::Present,
            purge_values: None,
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn absent(path: RegistryPath) -> Self {
        Self {
            ensure: Ensure::Absent,
            ..Self::present(path)
        }
    }

    #[must_use]
    pub fn with_purge_values(mut self, purge: bool) -> Self {
        self.purge_values = Some(purge);
        self
    }

    #[must_use]
    pub fn requires(mut self, id: ResourceId) -> Self {
        self.depends_on.push(id);
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::Key(self.path.clone())
    }
}

/// Desired state of a named value inside a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueResource {
    /// Owning key
    pub path: RegistryPath,
    pub name: ValueName,
    pub ensure: Ensure,
    /// Required when `ensure` is PRESENT, ignored otherwise
    pub data: Option<ValueData>,
    pub depends_on: Vec<ResourceId>,
}

impl ValueResource {
    #[must_use]
    pub fn present(path: RegistryPath, name: impl Into<ValueName>, data: ValueData) -> Self {
        Self {
            path,
            name: name.into(),
            ensure: Ensure::Present,
            data: Some(data),
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn absent(path: RegistryPath, name: impl Into<ValueName>) -> Self {
        Self {
            path,
            name: name.into(),
            ensure: Ensure::Absent,
            data: None,
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn requires(mut self, id: ResourceId) -> Self {
        self.depends_on.push(id);
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::Value {
            key: self.path.clone(),
            name: self.name.clone(),
        }
    }
}

/// One declared resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Key(KeyResource),
    Value(ValueResource),
}

impl Resource {
    #[must_use]
    pub fn id(&self) -> ResourceId {
        match self {
            Resource::Key(key) => key.id(),
            Resource::Value(value) => value.id(),
        }
    }

    #[inline]
    #[must_use]
    pub fn ensure(&self) -> Ensure {
        match self {
            Resource::Key(key) => key.ensure,
            Resource::Value(value) => value.ensure,
        }
    }

    #[inline]
    #[must_use]
    pub fn depends_on(&self) -> &[ResourceId] {
        match self {
            Resource::Key(key) => &key.depends_on,
            Resource::Value(value) => &value.depends_on,
        }
    }

    #[inline]
    #[must_use]
    pub fn key_path(&self) -> &RegistryPath {
        match self {
            Resource::Key(key) => &key.path,
            Resource::Value(value) => &value.path,
        }
    }
}

impl From<KeyResource> for Resource {
    fn from(key: KeyResource) -> Self {
        Resource::Key(key)
    }
}

impl From<ValueResource> for Resource {
    fn from(value: ValueResource) -> Self {
        Resource::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_data_equality_includes_type_tag() {
        assert_ne!(ValueData::String("1".into()), ValueData::Dword(1));
        assert_ne!(
            ValueData::String("x".into()),
            ValueData::ExpandString("x".into())
        );
        assert_ne!(ValueData::Dword(1), ValueData::Qword(1));
        assert_ne!(ValueData::String("Data".into()), ValueData::String("data".into()));
        assert_ne!(
            ValueData::MultiString(vec!["a".into(), "b".into()]),
            ValueData::MultiString(vec!["b".into(), "a".into()])
        );
        assert_eq!(ValueData::Binary(vec![1, 2]), ValueData::Binary(vec![1, 2]));
    }

    #[test]
    fn value_data_serializes_with_type_tag() {
        let json = serde_json::to_string(&ValueData::Dword(7)).unwrap();
        assert_eq!(json, r#"{"type":"dword","value":7}"#);

        let data: ValueData =
            serde_json::from_str(r#"{"type":"multi_string","value":["a","b"]}"#).unwrap();
        assert_eq!(data, ValueData::MultiString(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn value_names_compare_case_insensitively() {
        assert_eq!(ValueName::new("Value1"), ValueName::new("VALUE1"));
        assert!(ValueName::default_value().is_default());
        assert_eq!(ValueName::new("Value1").as_str(), "Value1");
    }

    #[test]
    fn resource_ids_render_like_references() {
        let key: RegistryPath = r"HKLM\Software\Foo".parse().unwrap();
        assert_eq!(
            ResourceId::Key(key.clone()).to_string(),
            r"Registry_key[HKLM\Software\Foo]"
        );
        let named = ValueResource::absent(key.clone(), "Bar").id();
        assert_eq!(named.to_string(), r"Registry_value[HKLM\Software\Foo\Bar]");
        let default = ValueResource::absent(key, ValueName::default_value()).id();
        assert_eq!(default.to_string(), r"Registry_value[HKLM\Software\Foo\\]");
    }
}
