//! The read pipeline: materialize components with their dependency
//! closures, fetching remotes for whatever the local store is missing.

use std::collections::BTreeMap;

use tracing::debug;

use keel_sources::ComponentObjects;
use keel_store::{Component, Version};
use keel_types::ComponentId;

use crate::error::{ScopeError, ScopeResult};
use crate::scope::Scope;

/// A component catalog with one loaded version.
#[derive(Clone, Debug)]
pub struct ComponentVersion {
    /// Fully versioned id of the loaded version.
    pub id: ComponentId,
    pub component: Component,
    pub version: Version,
}

/// A loaded version together with its full flattened dependency set.
#[derive(Clone, Debug)]
pub struct VersionDependencies {
    pub id: ComponentId,
    pub component: Component,
    pub version: Version,
    pub dependencies: Vec<ComponentVersion>,
}

impl Scope {
    /// Resolve ids to their loaded form with full dependency closure.
    ///
    /// Local ids must resolve from the local store. External ids are
    /// queried locally first; misses (or everything, when `cache` is off)
    /// are fetched from their remotes and merged in. Output preserves input
    /// order. An empty input returns immediately with no remote contact.
    pub async fn import_many(
        &mut self,
        ids: &[ComponentId],
        cache: bool,
        persist: bool,
    ) -> ScopeResult<Vec<VersionDependencies>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut to_fetch: Vec<ComponentId> = Vec::new();
        for id in ids {
            if self.is_local(id) {
                continue;
            }
            if !cache || self.sources().get(id)?.is_none() {
                to_fetch.push(id.clone());
            }
        }
        if !to_fetch.is_empty() {
            self.fetch_external(&to_fetch, false).await?;
        }

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.materialize(id).await?);
        }

        if persist {
            self.sources_mut().objects_mut().persist()?;
        }

        let id_strings: Vec<String> = out.iter().map(|vd| vd.id.to_string()).collect();
        self.run_hook("post-import", self.hooks().post_import(&id_strings))
            .await;
        Ok(out)
    }

    /// The version-only variant: loads each id's head (or named) version
    /// without recursing into flattened dependencies.
    pub async fn import_many_ones(
        &mut self,
        ids: &[ComponentId],
        cache: bool,
    ) -> ScopeResult<Vec<ComponentVersion>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut to_fetch: Vec<ComponentId> = Vec::new();
        for id in ids {
            if self.is_local(id) {
                continue;
            }
            if !cache || self.sources().get(id)?.is_none() {
                to_fetch.push(id.clone());
            }
        }
        if !to_fetch.is_empty() {
            self.fetch_external(&to_fetch, true).await?;
            self.sources_mut().objects_mut().persist()?;
        }

        ids.iter().map(|id| self.head_of(id)).collect()
    }

    /// Load one id with its closure, allowing a single re-fetch round for
    /// external dependencies the local store is missing.
    async fn materialize(&mut self, id: &ComponentId) -> ScopeResult<VersionDependencies> {
        let head = self.head_of(id)?;

        let mut missing: Vec<ComponentId> = Vec::new();
        for dep in &head.version.flattened_dependencies {
            if !self.dependency_missing(dep)? {
                continue;
            }
            if self.is_local(dep) {
                return Err(ScopeError::DependencyNotFound(dep.clone()));
            }
            missing.push(dep.clone());
        }
        if !missing.is_empty() {
            debug!(id = %id, missing = missing.len(), "re-fetching missing dependencies");
            self.fetch_external(&missing, false).await?;
        }

        let dependencies = head
            .version
            .flattened_dependencies
            .iter()
            .map(|dep| self.load_dependency(dep))
            .collect::<ScopeResult<Vec<_>>>()?;

        Ok(VersionDependencies {
            id: head.id,
            component: head.component,
            version: head.version,
            dependencies,
        })
    }

    /// Load an id's named (or latest) version from the local store.
    fn head_of(&self, id: &ComponentId) -> ScopeResult<ComponentVersion> {
        let component = self
            .sources()
            .get(id)?
            .ok_or_else(|| ScopeError::ComponentNotFound(id.clone()))?;
        let version_num = id
            .version
            .clone()
            .or_else(|| component.latest().cloned())
            .ok_or_else(|| ScopeError::ComponentNotFound(id.clone()))?;
        let (_, version) = self.sources().load_version(&component, Some(&version_num))?;
        Ok(ComponentVersion {
            id: id.without_version().with_version(version_num),
            component,
            version,
        })
    }

    /// Like [`Scope::head_of`], but a failure means an unresolvable
    /// transitive dependency.
    fn load_dependency(&self, id: &ComponentId) -> ScopeResult<ComponentVersion> {
        self.head_of(id)
            .map_err(|_| ScopeError::DependencyNotFound(id.clone()))
    }

    /// True when the dependency's catalog or version object is absent.
    fn dependency_missing(&self, dep: &ComponentId) -> ScopeResult<bool> {
        let Some(component) = self.sources().get(dep)? else {
            return Ok(true);
        };
        let Some(version) = dep.version.clone().or_else(|| component.latest().cloned()) else {
            return Ok(true);
        };
        let Some(reference) = component.version_ref(&version) else {
            return Ok(true);
        };
        Ok(!self.sources().objects().has(&reference))
    }

    /// Fetch external ids from their remotes, grouped by scope, and merge
    /// the returned bundles. A failing remote is retried against every
    /// other registered remote before the first error surfaces.
    pub(crate) async fn fetch_external(
        &mut self,
        ids: &[ComponentId],
        only_head: bool,
    ) -> ScopeResult<Vec<String>> {
        let mut by_scope: BTreeMap<String, Vec<ComponentId>> = BTreeMap::new();
        for id in ids {
            let scope = id.scope.clone().ok_or_else(|| {
                ScopeError::InvalidOperation(format!("cannot fetch scope-less id {id} remotely"))
            })?;
            by_scope.entry(scope).or_default().push(id.clone());
        }

        let registry = self.remotes();
        let mut merged = Vec::new();
        for (scope_name, group) in by_scope {
            let primary = registry.resolve(&scope_name)?;
            let bundles = match primary.fetch(&group, only_head).await {
                Ok(bundles) => bundles,
                Err(first_err) => {
                    let mut recovered = None;
                    for other in registry.others(&scope_name) {
                        if let Ok(bundles) = other.fetch(&group, only_head).await {
                            recovered = Some(bundles);
                            break;
                        }
                    }
                    match recovered {
                        Some(bundles) => bundles,
                        None => return Err(first_err.into()),
                    }
                }
            };

            for bundle in bundles {
                let objects = ComponentObjects::from_bundle(&bundle)?;
                // Head-only bundles list versions whose objects they do not
                // carry; merge tolerates those gaps.
                let component = self.sources_mut().merge(objects, only_head)?;
                merged.push(component.to_id().to_string());
            }
        }
        debug!(count = merged.len(), only_head, "fetched and merged remote components");
        Ok(merged)
    }
}
