use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use semver::Version as Semver;
use tracing::debug;

use keel_store::{
    Component, ComponentBundle, Dependency, FileEntry, IndexKind, LogEntry, Repository,
    ScopeObject, Source, SpecsResults, StoreError, Symlink, Version,
};
use keel_types::{first_version, ComponentId, ReleaseType};

use crate::error::{SourcesError, SourcesResult};

/// A file belonging to a component revision, content included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub relative_path: String,
    pub content: Vec<u8>,
}

/// A component plus every `Version` it lists plus every `Source` those
/// versions reference. Dependency ids are not inlined.
#[derive(Clone, Debug)]
pub struct ComponentObjects {
    pub component: Component,
    pub objects: Vec<ScopeObject>,
}

impl ComponentObjects {
    /// Encode for transport.
    pub fn into_bundle(self) -> SourcesResult<ComponentBundle> {
        let component = ScopeObject::Component(self.component).encode()?;
        let objects = self
            .objects
            .iter()
            .map(|obj| obj.encode())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ComponentBundle::new(component, objects))
    }

    /// Decode from transport form.
    pub fn from_bundle(bundle: &ComponentBundle) -> SourcesResult<Self> {
        let component = match bundle.component()? {
            ScopeObject::Component(c) => c,
            other => {
                return Err(SourcesError::Store(StoreError::BadBundle(format!(
                    "bundle head is a {}, expected a component",
                    other.kind()
                ))))
            }
        };
        Ok(Self {
            component,
            objects: bundle.decode_objects()?,
        })
    }
}

/// Everything needed to persist one new source revision.
#[derive(Clone, Debug)]
pub struct AddSource {
    pub id: ComponentId,
    pub main_file: String,
    pub files: Vec<SourceFile>,
    pub dists: Option<Vec<SourceFile>>,
    /// Direct dependencies, fully qualified with versions.
    pub dependencies: Vec<Dependency>,
    /// Transitive closure of `dependencies`; deduplicated here.
    pub flattened_dependencies: Vec<ComponentId>,
    pub package_dependencies: BTreeMap<String, String>,
    pub compiler: Option<ComponentId>,
    pub tester: Option<ComponentId>,
    pub message: String,
    pub author: Option<String>,
    pub exact_version: Option<Semver>,
    pub release_type: ReleaseType,
    pub specs_results: Option<SpecsResults>,
}

/// Higher-level CRUD over logical components, owning the object repository.
pub struct Sources {
    repo: Repository,
}

impl Sources {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub fn objects(&self) -> &Repository {
        &self.repo
    }

    pub fn objects_mut(&mut self) -> &mut Repository {
        &mut self.repo
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Resolve an id to its current catalog, following at most one symlink
    /// hop: a local id that was exported resolves through its symlink to the
    /// scoped component.
    pub fn get(&self, id: &ComponentId) -> SourcesResult<Option<Component>> {
        match self.repo.load_by_id(id)? {
            Some(ScopeObject::Component(c)) => Ok(Some(c)),
            Some(ScopeObject::Symlink(link)) => {
                let redirected = link.redirect();
                match self.repo.load_by_id(&redirected)? {
                    Some(ScopeObject::Component(c)) => Ok(Some(c)),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// Resolve an id without following symlinks.
    pub fn get_without_redirect(&self, id: &ComponentId) -> SourcesResult<Option<Component>> {
        match self.repo.load_by_id(id)? {
            Some(ScopeObject::Component(c)) => Ok(Some(c)),
            _ => Ok(None),
        }
    }

    /// The symlink stored under an id, if any.
    pub fn get_symlink(&self, id: &ComponentId) -> SourcesResult<Option<Symlink>> {
        match self.repo.load_by_id(id)? {
            Some(ScopeObject::Symlink(link)) => Ok(Some(link)),
            _ => Ok(None),
        }
    }

    /// Batched lookup preserving input order.
    pub fn get_many(
        &self,
        ids: &[ComponentId],
    ) -> SourcesResult<Vec<(ComponentId, Option<Component>)>> {
        ids.iter()
            .map(|id| Ok((id.clone(), self.get(id)?)))
            .collect()
    }

    /// Load one version of a component: the id's version when given,
    /// otherwise the latest.
    pub fn load_version(
        &self,
        component: &Component,
        requested: Option<&Semver>,
    ) -> SourcesResult<(Semver, Version)> {
        let id = component.to_id().to_string_without_version();
        let version = match requested {
            Some(v) => v.clone(),
            None => component
                .latest()
                .cloned()
                .ok_or_else(|| SourcesError::ComponentNotFound(component.to_id()))?,
        };
        let reference =
            component
                .version_ref(&version)
                .ok_or_else(|| SourcesError::VersionNotFound {
                    id: id.clone(),
                    version: version.clone(),
                })?;
        match self.repo.load(&reference)? {
            ScopeObject::Version(v) => Ok((version, v)),
            other => Err(SourcesError::Store(StoreError::CorruptObject {
                id: reference,
                reason: format!("expected version, got {}", other.kind()),
            })),
        }
    }

    /// The component plus its complete blob closure.
    pub fn get_objects(&self, id: &ComponentId) -> SourcesResult<ComponentObjects> {
        let component = self
            .get(id)?
            .ok_or_else(|| SourcesError::ComponentNotFound(id.clone()))?;

        let mut objects = Vec::new();
        let mut source_refs = BTreeSet::new();
        for reference in component.versions.values() {
            let version = match self.repo.load(reference)? {
                ScopeObject::Version(v) => v,
                other => {
                    return Err(SourcesError::Store(StoreError::CorruptObject {
                        id: *reference,
                        reason: format!("expected version, got {}", other.kind()),
                    }))
                }
            };
            source_refs.extend(version.source_refs());
            objects.push(ScopeObject::Version(version));
        }
        for reference in source_refs {
            objects.push(self.repo.load(&reference)?);
        }
        Ok(ComponentObjects { component, objects })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// The write primitive: stage a new revision of a component.
    ///
    /// Loads (or creates) the catalog, computes the next version, places the
    /// file contents as `Source` objects, builds the `Version`, and stages
    /// the lot together with the repointed catalog. Nothing is durable until
    /// the repository persists.
    pub fn add_source(&mut self, request: AddSource) -> SourcesResult<(Component, Semver)> {
        let mut component = self
            .get_without_redirect(&request.id)?
            .unwrap_or_else(|| Component::from_id(&request.id));
        let next = next_version(
            &component,
            request.exact_version.as_ref(),
            request.release_type,
        )?;

        let files = self.place_sources(&request.files)?;
        let dists = match &request.dists {
            Some(dists) => Some(self.place_sources(dists)?),
            None => None,
        };

        let version = Version {
            main_file: request.main_file.clone(),
            files,
            dists,
            dependencies: request.dependencies.clone(),
            flattened_dependencies: dedup_by_version(&request.flattened_dependencies),
            package_dependencies: request.package_dependencies.clone(),
            compiler: request.compiler.clone(),
            tester: request.tester.clone(),
            log: LogEntry {
                message: request.message.clone(),
                date: Utc::now(),
                author: request.author.clone(),
            },
            specs_results: request.specs_results.clone(),
        };

        let component = self.stage_new_version(&mut component, next.clone(), version)?;
        debug!(id = %component.to_id(), version = %next, "staged new source revision");
        Ok((component, next))
    }

    /// Stage an already-built `Version` under a fresh bump. Used by the
    /// dependency auto-bump path, where the version body is derived from an
    /// existing release rather than from working-copy files.
    pub fn put_additional_version(
        &mut self,
        component: &Component,
        mut version: Version,
        message: &str,
        release_type: ReleaseType,
    ) -> SourcesResult<(Component, Semver)> {
        let mut component = component.clone();
        let next = next_version(&component, None, release_type)?;
        version.log = LogEntry {
            message: message.to_string(),
            date: Utc::now(),
            author: version.log.author.take(),
        };
        let component = self.stage_new_version(&mut component, next.clone(), version)?;
        Ok((component, next))
    }

    /// Stage a new value of a component catalog, superseding the current
    /// head ref (which is staged for removal).
    pub fn put_component(&mut self, component: Component) -> SourcesResult<Component> {
        let prior = self
            .repo
            .index()
            .get(&component.to_id().to_string_without_version())
            .copied();
        let new_ref = self.repo.add(&ScopeObject::Component(component.clone()))?;
        if let Some(entry) = prior {
            if entry.kind == IndexKind::Component && entry.reference != new_ref {
                self.repo.remove(&entry.reference);
            }
        }
        Ok(component)
    }

    fn stage_new_version(
        &mut self,
        component: &mut Component,
        next: Semver,
        version: Version,
    ) -> SourcesResult<Component> {
        let version_ref = self.repo.add(&ScopeObject::Version(version))?;
        component.add_version(next, version_ref);
        self.put_component(component.clone())
    }

    fn place_sources(&mut self, files: &[SourceFile]) -> SourcesResult<Vec<FileEntry>> {
        files
            .iter()
            .map(|f| {
                let reference = self
                    .repo
                    .add(&ScopeObject::Source(Source::new(f.content.clone())))?;
                Ok(FileEntry {
                    name: f.name.clone(),
                    relative_path: f.relative_path.clone(),
                    file: reference,
                })
            })
            .collect()
    }

    /// Merge an incoming bundle into the local store.
    ///
    /// Absent objects are added; present identical refs are skipped; two
    /// catalogs for the same id union their version maps, and a version key
    /// present on both sides must map to the same ref.
    pub fn merge(
        &mut self,
        incoming: ComponentObjects,
        ignore_missing_objects: bool,
    ) -> SourcesResult<Component> {
        let id = incoming.component.to_id();
        let mut bundle_refs = BTreeSet::new();
        for obj in &incoming.objects {
            bundle_refs.insert(obj.hash()?);
        }

        if !ignore_missing_objects {
            for (version, reference) in &incoming.component.versions {
                if !bundle_refs.contains(reference) && !self.repo.has(reference) {
                    debug!(id = %id, %version, "merge rejected: version object missing");
                    return Err(SourcesError::Store(StoreError::ObjectNotFound(*reference)));
                }
            }
        }

        let merged = match self.get_without_redirect(&id)? {
            None => incoming.component.clone(),
            Some(mut existing) => {
                for (version, reference) in &incoming.component.versions {
                    match existing.versions.get(version) {
                        Some(local) if local != reference => {
                            return Err(SourcesError::MergeConflict {
                                id: id.to_string_without_version(),
                                version: version.clone(),
                            });
                        }
                        Some(_) => {}
                        None => {
                            existing.add_version(version.clone(), *reference);
                        }
                    }
                }
                existing
            }
        };

        for obj in &incoming.objects {
            if !self.repo.has(&obj.hash()?) {
                self.repo.add(obj)?;
            }
        }
        self.put_component(merged)
    }

    /// Remove a specific version (when the id carries one and
    /// `delete_all_versions` is false) or the whole component.
    pub fn clean(&mut self, id: &ComponentId, delete_all_versions: bool) -> SourcesResult<()> {
        let Some(component) = self.get_without_redirect(id)? else {
            return Ok(());
        };
        let head_ref = self
            .repo
            .index()
            .get(&id.to_string_without_version())
            .map(|entry| entry.reference);

        match (&id.version, delete_all_versions) {
            (Some(version), false) => {
                let mut component = component;
                let removed = component.remove_version(version);
                if let Some(reference) = removed {
                    self.repo.remove(&reference);
                }
                if component.versions.is_empty() {
                    if let Some(reference) = head_ref {
                        self.repo.remove(&reference);
                    }
                } else {
                    let new_ref = self.repo.add(&ScopeObject::Component(component))?;
                    if let Some(reference) = head_ref {
                        if reference != new_ref {
                            self.repo.remove(&reference);
                        }
                    }
                }
            }
            _ => {
                for reference in component.versions.values() {
                    match self.repo.load(reference) {
                        Ok(ScopeObject::Version(version)) => {
                            self.repo.remove_many(&version.source_refs());
                            self.repo.remove(reference);
                        }
                        Ok(_) | Err(StoreError::ObjectNotFound(_)) => {
                            self.repo.remove(reference);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                if let Some(reference) = head_ref {
                    self.repo.remove(&reference);
                }
            }
        }
        debug!(id = %id, delete_all_versions, "cleaned component");
        Ok(())
    }

    /// Remove the symlink stored under an id, if any. Returns whether one
    /// existed.
    pub fn remove_symlink(&mut self, id: &ComponentId) -> SourcesResult<bool> {
        let key = id.without_version().to_string_without_version();
        match self.repo.index().get(&key).copied() {
            Some(entry) if entry.kind == IndexKind::Symlink => {
                self.repo.remove(&entry.reference);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn next_version(
    component: &Component,
    exact: Option<&Semver>,
    release_type: ReleaseType,
) -> SourcesResult<Semver> {
    let id = component.to_id().to_string_without_version();
    match (exact, component.latest()) {
        (Some(exact), Some(latest)) => {
            if component.has_version(exact) {
                return Err(SourcesError::VersionExists {
                    id,
                    version: exact.clone(),
                });
            }
            if exact < latest {
                return Err(SourcesError::VersionNotGreater {
                    id,
                    version: exact.clone(),
                    latest: latest.clone(),
                });
            }
            Ok(exact.clone())
        }
        (Some(exact), None) => Ok(exact.clone()),
        (None, Some(latest)) => Ok(release_type.bump(latest)),
        (None, None) => Ok(first_version()),
    }
}

/// Deduplicate by id-with-version, preserving first occurrence order.
fn dedup_by_version(ids: &[ComponentId]) -> Vec<ComponentId> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.to_string_with_version()))
        .cloned()
        .collect()
}
