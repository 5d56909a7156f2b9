//! Declaration set
//!
//! Normalizes declared resources onto the host's views, collapses
//! duplicates and rejects declarations no plan could satisfy. Everything
//! here is fatal: a [`PlanError`] means nothing gets applied.

use crate::error::PlanError;
use crate::path::{PathResolver, RegistryPath};
use crate::purge::purge_enabled;
use crate::types::{Ensure, KeyResource, Resource, ResourceId, ValueName};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Validated, deduplicated resources in first-declared order
#[derive(Debug, Clone, Default)]
pub struct DeclarationSet {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
}

impl DeclarationSet {
    /// Validate and index `resources`
    pub fn build(
        resources: impl IntoIterator<Item = Resource>,
        resolver: &PathResolver,
    ) -> Result<Self, PlanError> {
        Self::build_with_purge_default(resources, resolver, None)
    }

    /// Like [`DeclarationSet::build`]; duplicate keys are compared on the
    /// purge behavior they get once `purge_default` fills unset flags
    pub fn build_with_purge_default(
        resources: impl IntoIterator<Item = Resource>,
        resolver: &PathResolver,
        purge_default: Option<bool>,
    ) -> Result<Self, PlanError> {
        let mut set = Self::default();
        for resource in resources {
            set.insert(normalize(resource, resolver), purge_default)?;
        }
        set.check_references()?;
        set.check_ambiguous_order()?;
        debug!(resources = set.len(), "declarations validated");
        Ok(set)
    }

    fn insert(&mut self, resource: Resource, purge_default: Option<bool>) -> Result<(), PlanError> {
        let id = resource.id();
        match &resource {
            Resource::Key(key) if key.path.is_hive_root() => return Err(PlanError::HiveRoot(id)),
            Resource::Value(value) if value.ensure == Ensure::Present && value.data.is_none() => {
                return Err(PlanError::MissingData(id))
            }
            _ => {}
        }

        let Some(&existing) = self.index.get(&id) else {
            self.index.insert(id, self.resources.len());
            self.resources.push(resource);
            return Ok(());
        };

        let first = &mut self.resources[existing];
        if let Some(reason) = incompatibility(first, &resource, purge_default) {
            return Err(PlanError::Conflict { id, reason });
        }
        let deps = match first {
            Resource::Key(key) => &mut key.depends_on,
            Resource::Value(value) => &mut value.depends_on,
        };
        for dep in resource.depends_on() {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }
        debug!(%id, "merged duplicate declaration");
        Ok(())
    }

    fn check_references(&self) -> Result<(), PlanError> {
        for resource in &self.resources {
            let from = resource.id();
            for target in resource.depends_on() {
                if *target == from {
                    return Err(PlanError::Cycle {
                        cycles: vec![vec![from]],
                    });
                }
                if !self.index.contains_key(target) {
                    return Err(PlanError::UnknownReference {
                        from,
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    // Creating something beneath a key that is being deleted has no valid
    // order: either the creation is lost or the deletion fails.
    fn check_ambiguous_order(&self) -> Result<(), PlanError> {
        for resource in &self.resources {
            if resource.ensure() != Ensure::Present {
                continue;
            }
            if let Some(ancestor) = self.nearest_key(&resource.id()) {
                let absent = std::iter::once(ancestor)
                    .chain(self.enclosing_keys(&ancestor.path))
                    .find(|key| key.ensure == Ensure::Absent);
                if let Some(absent) = absent {
                    return Err(PlanError::AmbiguousOrder {
                        ancestor: absent.id(),
                        descendant: resource.id(),
                    });
                }
            }
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Declared key at exactly `path`
    #[must_use]
    pub fn key(&self, path: &RegistryPath) -> Option<&KeyResource> {
        match self.get(&ResourceId::Key(path.clone())) {
            Some(Resource::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Nearest declared key containing `id`: the owning key for a value,
    /// a proper ancestor for a key
    #[must_use]
    pub fn nearest_key(&self, id: &ResourceId) -> Option<&KeyResource> {
        match id {
            ResourceId::Value { key, .. } => self
                .key(key)
                .or_else(|| self.enclosing_keys(key).next()),
            ResourceId::Key(path) => self.enclosing_keys(path).next(),
        }
    }

    /// Declared proper ancestors of `path`, nearest first
    fn enclosing_keys(&self, path: &RegistryPath) -> impl Iterator<Item = &KeyResource> + '_ {
        let ancestors: Vec<RegistryPath> = path.ancestors().collect();
        ancestors
            .into_iter()
            .filter_map(move |ancestor| self.key(&ancestor))
    }

    /// Names of every value declared directly under `key`, any ensure
    #[must_use]
    pub fn value_names_under(&self, key: &RegistryPath) -> HashSet<ValueName> {
        self.resources
            .iter()
            .filter_map(|resource| match resource {
                Resource::Value(value) if value.path == *key => Some(value.name.clone()),
                _ => None,
            })
            .collect()
    }
}

fn normalize(resource: Resource, resolver: &PathResolver) -> Resource {
    let deps = |deps: Vec<ResourceId>| {
        deps.iter()
            .map(|dep| resolver.normalize_id(dep))
            .collect::<Vec<_>>()
    };
    match resource {
        Resource::Key(mut key) => {
            key.path = resolver.normalize(&key.path);
            key.depends_on = deps(key.depends_on);
            Resource::Key(key)
        }
        Resource::Value(mut value) => {
            value.path = resolver.normalize(&value.path);
            value.depends_on = deps(value.depends_on);
            Resource::Value(value)
        }
    }
}

fn incompatibility(
    first: &Resource,
    second: &Resource,
    purge_default: Option<bool>,
) -> Option<String> {
    if first.ensure() != second.ensure() {
        return Some(format!(
            "ensure {:?} vs {:?}",
            first.ensure(),
            second.ensure()
        ));
    }
    match (first, second) {
        (Resource::Key(a), Resource::Key(b))
            if purge_enabled(a, purge_default) != purge_enabled(b, purge_default) =>
        {
            Some(format!(
                "purge_values {:?} vs {:?}",
                a.purge_values, b.purge_values
            ))
        }
        (Resource::Value(a), Resource::Value(b))
            if a.ensure == Ensure::Present && a.data != b.data =>
        {
            let show = |data: &Option<_>| match data {
                Some(data) => format!("{data}"),
                None => "none".to_string(),
            };
            Some(format!("data {} vs {}", show(&a.data), show(&b.data)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{HostArch, View};
    use crate::types::{ValueData, ValueResource};

    fn path(raw: &str) -> RegistryPath {
        raw.parse().unwrap()
    }

    fn build(resources: Vec<Resource>) -> Result<DeclarationSet, PlanError> {
        DeclarationSet::build(resources, &PathResolver::default())
    }

    #[test]
    fn compatible_duplicates_collapse() {
        let a = KeyResource::present(path(r"HKLM\Software\Foo"));
        let b = KeyResource::present(path(r"hklm\software\foo"))
            .requires(ResourceId::Key(path(r"HKLM\Software\Bar")));
        let bar = KeyResource::present(path(r"HKLM\Software\Bar"));

        let set = build(vec![a.into(), b.into(), bar.into()]).unwrap();
        assert_eq!(set.len(), 2);
        let merged = set.key(&path(r"HKLM\Software\FOO")).unwrap();
        assert_eq!(merged.path.to_string(), r"HKLM\Software\Foo");
        assert_eq!(merged.depends_on.len(), 1);
    }

    #[test]
    fn conflicting_duplicates_are_rejected() {
        let a = ValueResource::present(path(r"HKLM\Software\Foo"), "V", ValueData::Dword(1));
        let b = ValueResource::present(path(r"HKLM\Software\Foo"), "v", ValueData::Dword(2));
        assert!(matches!(
            build(vec![a.into(), b.into()]),
            Err(PlanError::Conflict { .. })
        ));

        let c = KeyResource::present(path(r"HKLM\Software\Foo"));
        let d = KeyResource::absent(path(r"HKLM\Software\Foo"));
        assert!(matches!(
            build(vec![c.into(), d.into()]),
            Err(PlanError::Conflict { .. })
        ));
    }

    #[test]
    fn duplicate_keys_compare_effective_purge_behavior() {
        let unset = || KeyResource::present(path(r"HKLM\Software\Foo"));
        let off = || unset().with_purge_values(false);
        let on = || unset().with_purge_values(true);

        assert_eq!(build(vec![unset().into(), off().into()]).unwrap().len(), 1);
        assert!(matches!(
            build(vec![unset().into(), on().into()]),
            Err(PlanError::Conflict { .. })
        ));

        let resolver = PathResolver::default();
        let with_default = |a: KeyResource, b: KeyResource, default| {
            DeclarationSet::build_with_purge_default(vec![a.into(), b.into()], &resolver, default)
        };
        assert!(with_default(unset(), on(), Some(true)).is_ok());
        assert!(matches!(
            with_default(unset(), off(), Some(true)),
            Err(PlanError::Conflict { .. })
        ));

        // Absent keys never purge
        let gone = || KeyResource::absent(path(r"HKLM\Software\Foo"));
        assert!(build(vec![gone().into(), gone().with_purge_values(true).into()]).is_ok());
    }

    #[test]
    fn rejects_unmanageable_declarations() {
        let root = KeyResource::present(path("HKLM"));
        assert!(matches!(build(vec![root.into()]), Err(PlanError::HiveRoot(_))));

        let mut no_data = ValueResource::absent(path(r"HKLM\Software\Foo"), "V");
        no_data.ensure = Ensure::Present;
        assert!(matches!(build(vec![no_data.into()]), Err(PlanError::MissingData(_))));
    }

    #[test]
    fn references_must_be_declared() {
        let key = KeyResource::present(path(r"HKLM\Software\Foo"))
            .requires(ResourceId::Key(path(r"HKLM\Software\Missing")));
        assert!(matches!(
            build(vec![key.into()]),
            Err(PlanError::UnknownReference { .. })
        ));

        let own = KeyResource::present(path(r"HKLM\Software\Foo"))
            .requires(ResourceId::Key(path(r"HKLM\Software\Foo")));
        assert!(build(vec![own.into()]).unwrap_err().is_cycle());
    }

    #[test]
    fn present_beneath_absent_is_ambiguous() {
        let parent = KeyResource::absent(path(r"HKLM\Software\K"));
        let child = KeyResource::present(path(r"HKLM\Software\K\A\B"));
        let err = build(vec![parent.into(), child.into()]).unwrap_err();
        assert!(err.is_cycle());
        assert!(matches!(err, PlanError::AmbiguousOrder { .. }));

        let value = ValueResource::present(path(r"HKLM\Software\K"), "V", ValueData::Dword(1));
        let parent = KeyResource::absent(path(r"HKLM\Software\K"));
        assert!(matches!(
            build(vec![parent.into(), value.into()]),
            Err(PlanError::AmbiguousOrder { .. })
        ));
    }

    #[test]
    fn absent_beneath_absent_is_fine() {
        let parent = KeyResource::absent(path(r"HKLM\Software\K"));
        let child = KeyResource::absent(path(r"HKLM\Software\K\C1"));
        let value = ValueResource::absent(path(r"HKLM\Software\K"), "V");
        assert!(build(vec![parent.into(), child.into(), value.into()]).is_ok());
    }

    #[test]
    fn nearest_key_skips_undeclared_levels() {
        let top = KeyResource::present(path(r"HKLM\Software\Vendor"));
        let set = build(vec![top.into()]).unwrap();
        let value = ResourceId::Value {
            key: path(r"HKLM\Software\Vendor\A\B"),
            name: ValueName::new("V"),
        };
        assert_eq!(
            set.nearest_key(&value).map(|k| k.path.to_string()),
            Some(r"HKLM\Software\Vendor".to_string())
        );
        assert!(set.nearest_key(&ResourceId::Key(path(r"HKLM\Software\Vendor"))).is_none());
    }

    #[test]
    fn redirected_declarations_collapse_on_x86() {
        let resolver = PathResolver::new(HostArch::X86, View::Native);
        let native = KeyResource::present(path(r"HKLM\Software\Foo"));
        let wow = KeyResource::present(path(r"32:HKLM\Software\Foo"));
        let set = DeclarationSet::build(vec![native.into(), wow.into()], &resolver).unwrap();
        assert_eq!(set.len(), 1);
    }
}
