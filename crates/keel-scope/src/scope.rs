use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use keel_remotes::RemoteRegistry;
use keel_sources::Sources;
use keel_store::Repository;
use keel_types::ComponentId;

use crate::component::{ComponentResolver, NoOpPipeline, Pipeline};
use crate::descriptor::{self, ScopeDescriptor, HIDDEN_SCOPE_DIR, SCOPE_JSON};
use crate::error::{ScopeError, ScopeResult};
use crate::hooks::{NoOpHooks, ScopeHooks};

/// Capabilities injected into a scope at construction.
pub struct ScopeOptions {
    pub hooks: Arc<dyn ScopeHooks>,
    pub pipeline: Arc<dyn Pipeline>,
    /// Process-wide remotes; shadowed by scope-local ones on name collision.
    pub global_remotes: RemoteRegistry,
    /// Remotes bound to this scope only.
    pub local_remotes: RemoteRegistry,
    pub resolver: Option<Arc<dyn ComponentResolver>>,
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            hooks: Arc::new(NoOpHooks),
            pipeline: Arc::new(NoOpPipeline),
            global_remotes: RemoteRegistry::new(),
            local_remotes: RemoteRegistry::new(),
            resolver: None,
        }
    }
}

/// Result of [`Scope::remove_many`].
#[derive(Debug, Default)]
pub struct RemovedComponents {
    pub removed: Vec<ComponentId>,
    pub missing: Vec<ComponentId>,
    /// Target id string to the local components depending on it. Non-empty
    /// only when the removal was refused.
    pub dependent_bits: BTreeMap<String, Vec<ComponentId>>,
}

/// One scope: an object store, its metadata, and the operations over them.
///
/// A `Scope` exclusively owns its repository for its lifetime; running two
/// processes against the same directory is outside the contract.
pub struct Scope {
    root: PathBuf,
    descriptor: ScopeDescriptor,
    sources: Sources,
    options: ScopeOptions,
}

impl Scope {
    /// Create a new scope at `path`: `scope.json`, `objects/` and `tmp/`.
    /// Fails if a scope already exists there.
    pub fn init(path: &Path, name: &str, options: ScopeOptions) -> ScopeResult<Self> {
        if path.join(SCOPE_JSON).exists() {
            return Err(ScopeError::ScopeExists(path.to_path_buf()));
        }
        fs::create_dir_all(path.join("objects"))?;
        fs::create_dir_all(path.join("tmp"))?;
        let descriptor = ScopeDescriptor::new(name);
        descriptor.write(path)?;
        let sources = Sources::new(Repository::open(path)?);
        debug!(name, path = %path.display(), "initialized scope");
        Ok(Self {
            root: path.to_path_buf(),
            descriptor,
            sources,
            options,
        })
    }

    /// Create a scope inside a hidden `.keel` directory under `path`.
    pub fn init_hidden(path: &Path, name: &str, options: ScopeOptions) -> ScopeResult<Self> {
        let root = path.join(HIDDEN_SCOPE_DIR);
        fs::create_dir_all(&root)?;
        Self::init(&root, name, options)
    }

    /// Load the scope governing `path`, walking ancestors to find its root.
    pub fn load(path: &Path, options: ScopeOptions) -> ScopeResult<Self> {
        let root = descriptor::locate(path)?;
        let descriptor = ScopeDescriptor::load(&root)?;
        let sources = Sources::new(Repository::open(&root)?);
        Ok(Self {
            root,
            descriptor,
            sources,
            options,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor(&self) -> &ScopeDescriptor {
        &self.descriptor
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut ScopeDescriptor {
        &mut self.descriptor
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut Sources {
        &mut self.sources
    }

    pub(crate) fn pipeline(&self) -> Arc<dyn Pipeline> {
        self.options.pipeline.clone()
    }

    pub(crate) fn hooks(&self) -> Arc<dyn ScopeHooks> {
        self.options.hooks.clone()
    }

    /// The remotes visible to this scope: process-wide remotes composed
    /// with scope-local ones, local winning on name collision.
    pub fn remotes(&self) -> RemoteRegistry {
        RemoteRegistry::compose(&self.options.global_remotes, &self.options.local_remotes)
    }

    /// True when the id belongs to this scope or was created here.
    pub fn is_local(&self, id: &ComponentId) -> bool {
        id.is_local(self.name())
    }

    pub(crate) async fn run_hook<F>(&self, name: &str, invoke: F)
    where
        F: std::future::Future<Output = ScopeResult<()>>,
    {
        if let Err(err) = invoke.await {
            warn!(hook = name, %err, "hook failed; continuing");
        }
    }

    // -----------------------------------------------------------------------
    // Deprecate / remove / reset
    // -----------------------------------------------------------------------

    /// Mark each component deprecated and persist. Missing ids are skipped.
    pub async fn deprecate_many(&mut self, ids: &[ComponentId]) -> ScopeResult<Vec<ComponentId>> {
        let mut deprecated = Vec::new();
        for id in ids {
            let Some(mut component) = self.sources.get(id)? else {
                continue;
            };
            if !component.deprecated {
                component.deprecated = true;
                self.sources.put_component(component)?;
            }
            deprecated.push(id.without_version());
        }
        self.sources.objects_mut().persist()?;

        let id_strings: Vec<String> = deprecated.iter().map(|id| id.to_string()).collect();
        self.run_hook("post-deprecate", self.hooks().post_deprecate(&id_strings))
            .await;
        Ok(deprecated)
    }

    /// Remove components, refusing (without `force`) when local dependents
    /// exist. Returns what was removed, what was missing, and, on refusal,
    /// the dependents per target.
    pub async fn remove_many(
        &mut self,
        ids: &[ComponentId],
        force: bool,
    ) -> ScopeResult<RemovedComponents> {
        let mut result = RemovedComponents::default();
        let mut found: Vec<ComponentId> = Vec::new();
        for id in ids {
            let exists =
                self.sources.get(id)?.is_some() || self.sources.get_symlink(id)?.is_some();
            if exists {
                found.push(id.without_version());
            } else {
                result.missing.push(id.clone());
            }
        }

        if !force {
            result.dependent_bits = self.dependents_of(&found)?;
            if !result.dependent_bits.is_empty() {
                return Ok(result);
            }
        }

        for id in found {
            self.sources.clean(&id, true)?;
            self.sources.remove_symlink(&id)?;
            result.removed.push(id);
        }
        self.sources.objects_mut().persist()?;

        let id_strings: Vec<String> = result.removed.iter().map(|id| id.to_string()).collect();
        self.run_hook("post-remove", self.hooks().post_remove(&id_strings))
            .await;
        Ok(result)
    }

    /// Scan every local component's flattened dependencies for references
    /// to the target ids (version-insensitive).
    fn dependents_of(
        &self,
        targets: &[ComponentId],
    ) -> ScopeResult<BTreeMap<String, Vec<ComponentId>>> {
        let mut dependents: BTreeMap<String, Vec<ComponentId>> = BTreeMap::new();
        for catalog in self.sources.objects().list_components(false)? {
            let Some(component) = catalog.as_component() else {
                continue;
            };
            let holder = component.to_id();
            if targets.contains(&holder) {
                continue;
            }
            for reference in component.versions.values() {
                let Ok(object) = self.sources.objects().load(reference) else {
                    continue;
                };
                let Some(version) = object.as_version() else {
                    continue;
                };
                for dep in &version.flattened_dependencies {
                    for target in targets {
                        if dep == target {
                            let entry = dependents
                                .entry(target.to_string_without_version())
                                .or_default();
                            if !entry.contains(&holder) {
                                entry.push(holder.clone());
                            }
                        }
                    }
                }
            }
        }
        Ok(dependents)
    }

    /// Drop the latest version of a local component, or the whole component
    /// when only one version exists. The consumer is notified through the
    /// reset hook so it can drop the matching working copy.
    pub async fn reset(&mut self, id: &ComponentId) -> ScopeResult<()> {
        if !self.is_local(id) {
            return Err(ScopeError::InvalidOperation(format!(
                "reset requires a local component, got {id}"
            )));
        }
        let component = self
            .sources
            .get(id)?
            .ok_or_else(|| ScopeError::ComponentNotFound(id.clone()))?;

        let removed_version = match component.latest() {
            Some(latest) if component.versions.len() > 1 => {
                let latest = latest.clone();
                self.sources
                    .clean(&id.without_version().with_version(latest.clone()), false)?;
                Some(latest)
            }
            _ => {
                self.sources.clean(&id.without_version(), true)?;
                None
            }
        };
        self.sources.objects_mut().persist()?;
        debug!(id = %id, ?removed_version, "reset component");

        let notified = match removed_version {
            Some(version) => id.without_version().with_version(version).to_string(),
            None => id.without_version().to_string(),
        };
        self.run_hook("post-reset", self.hooks().post_reset(&[notified]))
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Environments
    // -----------------------------------------------------------------------

    /// Resolve the entry point of an environment component (compiler or
    /// tester), importing its head version first. Requires a
    /// [`ComponentResolver`] capability.
    pub async fn load_environment(&mut self, id: &ComponentId) -> ScopeResult<PathBuf> {
        let resolver = self
            .options
            .resolver
            .clone()
            .ok_or_else(|| ScopeError::Resolution("no component resolver configured".into()))?;

        let ones = self.import_many_ones(std::slice::from_ref(id), true).await?;
        let head = ones
            .first()
            .ok_or_else(|| ScopeError::ComponentNotFound(id.clone()))?;
        let root = self.root.clone();
        resolver
            .resolve(id, &head.version.main_file, &root)
            .await
            .map_err(|e| ScopeError::Resolution(e.to_string()))
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.descriptor.name)
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::init(dir.path(), "my-scope", ScopeOptions::default()).unwrap();
        assert_eq!(scope.name(), "my-scope");
        assert!(dir.path().join("scope.json").is_file());
        assert!(dir.path().join("objects").is_dir());
        assert!(dir.path().join("tmp").is_dir());
    }

    #[test]
    fn init_refuses_existing_scope() {
        let dir = tempfile::tempdir().unwrap();
        Scope::init(dir.path(), "first", ScopeOptions::default()).unwrap();
        assert!(matches!(
            Scope::init(dir.path(), "second", ScopeOptions::default()).unwrap_err(),
            ScopeError::ScopeExists(_)
        ));
    }

    #[test]
    fn load_finds_scope_from_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        Scope::init(dir.path(), "findme", ScopeOptions::default()).unwrap();
        let nested = dir.path().join("deep/inside");
        fs::create_dir_all(&nested).unwrap();

        let scope = Scope::load(&nested, ScopeOptions::default()).unwrap();
        assert_eq!(scope.name(), "findme");
    }

    #[test]
    fn load_outside_scope_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Scope::load(dir.path(), ScopeOptions::default()).unwrap_err(),
            ScopeError::ScopeNotFound(_)
        ));
    }

    #[test]
    fn init_hidden_creates_dot_directory() {
        let dir = tempfile::tempdir().unwrap();
        let scope = Scope::init_hidden(dir.path(), "hidden", ScopeOptions::default()).unwrap();
        assert!(scope.root().ends_with(HIDDEN_SCOPE_DIR));

        let reloaded = Scope::load(dir.path(), ScopeOptions::default()).unwrap();
        assert_eq!(reloaded.name(), "hidden");
    }
}
