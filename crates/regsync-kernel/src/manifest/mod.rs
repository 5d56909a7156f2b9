//! JSON declaration documents
//!
//! ```json
//! {
//!   "defaults":  { "key": { "purge_values": true } },
//!   "resources": [
//!     { "type": "key",   "path": "HKLM\\Software\\Vendor\\T1" },
//!     { "type": "value", "path": "HKLM\\Software\\Vendor\\T1\\Value1",
//!       "data": { "type": "dword", "value": 1 } }
//!   ]
//! }
//! ```
//!
//! A value's `path` is its full value path unless `name` is given, in which
//! case `path` is the owning key. `requires` takes resource references
//! (`Registry_key[...]`, `Registry_value[...]`).

use crate::error::{ManifestError, ParseError};
use crate::path::PathResolver;
use crate::types::{Ensure, KeyResource, Resource, ResourceId, ValueData, ValueName, ValueResource};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// Attribute values applied where a resource leaves them unset
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default)]
    pub key: KeyDefaults,
    #[serde(default)]
    pub value: ValueDefaults,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyDefaults {
    pub ensure: Option<Ensure>,
    pub purge_values: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueDefaults {
    pub ensure: Option<Ensure>,
    pub data: Option<ValueData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum ResourceDecl {
    Key {
        path: String,
        ensure: Option<Ensure>,
        purge_values: Option<bool>,
        #[serde(default)]
        requires: Vec<String>,
    },
    Value {
        path: String,
        name: Option<String>,
        ensure: Option<Ensure>,
        data: Option<ValueData>,
        #[serde(default)]
        requires: Vec<String>,
    },
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Resolve every declaration, applying defaults
    pub fn into_resources(self, resolver: &PathResolver) -> Result<Vec<Resource>, ManifestError> {
        let defaults = self.defaults;
        self.resources
            .into_iter()
            .enumerate()
            .map(|(index, decl)| {
                resolve(decl, &defaults, resolver)
                    .map_err(|source| ManifestError::Resource { index, source })
            })
            .collect()
    }
}

fn resolve(
    decl: ResourceDecl,
    defaults: &Defaults,
    resolver: &PathResolver,
) -> Result<Resource, ParseError> {
    let references = |requires: &[String]| -> Result<Vec<ResourceId>, ParseError> {
        requires.iter().map(|raw| resolver.parse_ref(raw)).collect()
    };

    match decl {
        ResourceDecl::Key {
            path,
            ensure,
            purge_values,
            requires,
        } => Ok(Resource::Key(KeyResource {
            path: resolver.parse(&path)?,
            ensure: ensure.or(defaults.key.ensure).unwrap_or_default(),
            purge_values: purge_values.or(defaults.key.purge_values),
            depends_on: references(&requires)?,
        })),
        ResourceDecl::Value {
            path,
            name,
            ensure,
            data,
            requires,
        } => {
            let (key, name) = match name {
                Some(name) => (resolver.parse(&path)?, ValueName::new(name)),
                None => resolver.parse_value(&path)?,
            };
            Ok(Resource::Value(ValueResource {
                path: key,
                name,
                ensure: ensure.or(defaults.value.ensure).unwrap_or_default(),
                data: data.or_else(|| defaults.value.data.clone()),
                depends_on: references(&requires)?,
            }))
        }
    }
}
