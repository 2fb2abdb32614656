//! Publication of local components to a named remote.
//!
//! Exporting rewrites scope-less dependency ids to their real scopes,
//! pushes the rewritten bundles, and only after a successful push swaps the
//! local components for symlinks so existing dependents keep resolving.

use std::collections::BTreeMap;

use tracing::debug;

use keel_sources::ComponentObjects;
use keel_store::{ScopeObject, Symlink};
use keel_types::{ComponentId, ObjectRef};

use crate::error::{ScopeError, ScopeResult};
use crate::scope::Scope;

impl Scope {
    /// Publish components to the remote registered under `remote_name`.
    ///
    /// On push failure the local scope is left untouched. On success each
    /// exported local id resolves through a symlink to the remote scope,
    /// and the authoritative (rewritten) objects are merged back locally.
    pub async fn export_many(
        &mut self,
        ids: &[ComponentId],
        remote_name: &str,
    ) -> ScopeResult<Vec<ComponentId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let remote = self.remotes().resolve(remote_name)?;

        let mut staged: Vec<(ComponentId, ComponentObjects)> = Vec::with_capacity(ids.len());
        for id in ids {
            let objects = match self.sources().get_objects(id) {
                Ok(objects) => objects,
                Err(keel_sources::SourcesError::ComponentNotFound(id)) => {
                    return Err(ScopeError::ComponentNotFound(id))
                }
                Err(e) => return Err(e.into()),
            };
            let rewritten = self.rewrite_for_export(objects, remote_name)?;
            staged.push((id.without_version(), rewritten));
        }

        let bundles = staged
            .iter()
            .map(|(_, objects)| objects.clone().into_bundle())
            .collect::<Result<Vec<_>, _>>()?;

        // Push before any local mutation: a refusal aborts cleanly.
        remote.push_many(bundles).await?;

        let mut exported = Vec::with_capacity(staged.len());
        for (local_id, rewritten) in staged {
            self.sources_mut().clean(&local_id, true)?;
            if local_id.scope.is_none() {
                self.sources_mut()
                    .objects_mut()
                    .add(&ScopeObject::Symlink(Symlink {
                        namespace: local_id.namespace.clone(),
                        name: local_id.name.clone(),
                        real_scope: remote_name.to_string(),
                    }))?;
            }
            let merged = self.sources_mut().merge(rewritten, false)?;
            exported.push(merged.to_id());
        }
        self.sources_mut().objects_mut().persist()?;
        debug!(remote = remote_name, count = exported.len(), "exported components");

        let id_strings: Vec<String> = exported.iter().map(|id| id.to_string()).collect();
        self.run_hook("post-export", self.hooks().post_export(&id_strings))
            .await;
        Ok(exported)
    }

    /// Rewrite a component closure for life on `remote_name`.
    ///
    /// Scope-less dependency ids become either the real scope of a matching
    /// local symlink (the dependency was exported elsewhere earlier) or the
    /// target remote. A version whose encoding changed gets a new ref and
    /// the catalog is repointed; untouched versions keep their refs.
    fn rewrite_for_export(
        &self,
        objects: ComponentObjects,
        remote_name: &str,
    ) -> ScopeResult<ComponentObjects> {
        let mut component = objects.component;
        if component.scope.is_none() {
            component.scope = Some(remote_name.to_string());
        }

        let mut ref_updates: BTreeMap<ObjectRef, ObjectRef> = BTreeMap::new();
        let mut rewritten = Vec::with_capacity(objects.objects.len());
        for object in objects.objects {
            match object {
                ScopeObject::Version(mut version) => {
                    let old_ref = ScopeObject::Version(version.clone()).hash()?;
                    let mut changed = false;
                    for dep in &mut version.dependencies {
                        if dep.id.scope.is_none() {
                            dep.id = self.exported_scope_of(&dep.id, remote_name)?;
                            changed = true;
                        }
                    }
                    for dep in &mut version.flattened_dependencies {
                        if dep.scope.is_none() {
                            *dep = self.exported_scope_of(dep, remote_name)?;
                            changed = true;
                        }
                    }
                    let object = ScopeObject::Version(version);
                    if changed {
                        ref_updates.insert(old_ref, object.hash()?);
                    }
                    rewritten.push(object);
                }
                other => rewritten.push(other),
            }
        }

        for reference in component.versions.values_mut() {
            if let Some(updated) = ref_updates.get(reference) {
                *reference = *updated;
            }
        }

        Ok(ComponentObjects {
            component,
            objects: rewritten,
        })
    }

    /// The scope a scope-less dependency id should carry after export: the
    /// real scope of its local symlink when it was exported before, else
    /// the target remote.
    fn exported_scope_of(
        &self,
        id: &ComponentId,
        remote_name: &str,
    ) -> ScopeResult<ComponentId> {
        match self.sources().get_symlink(id)? {
            Some(link) => Ok(id.with_scope(link.real_scope)),
            None => Ok(id.with_scope(remote_name)),
        }
    }
}
