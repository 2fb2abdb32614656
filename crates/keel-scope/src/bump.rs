//! Cascade version bumps: when committed components are depended upon,
//! stage new versions of the dependents with the dependency ids updated.

use tracing::debug;

use keel_types::{ComponentId, ReleaseType};

use crate::error::ScopeResult;
use crate::scope::Scope;

const BUMP_MESSAGE: &str = "bump dependencies versions";

impl Scope {
    /// For each candidate whose latest version depends on a just-committed
    /// component:
    ///
    /// - with `persist`, a strictly newer committed version stages a new
    ///   release of the candidate with the dependency (and its flattened
    ///   entry) repointed, and the batch is flushed;
    /// - without `persist`, a committed version at least as new reports the
    ///   candidate as pending, changing nothing.
    ///
    /// Returns the updated (or would-update) ids.
    pub async fn bump_dependencies_versions(
        &mut self,
        candidates: &[ComponentId],
        just_committed: &[ComponentId],
        persist: bool,
    ) -> ScopeResult<Vec<ComponentId>> {
        let mut touched = Vec::new();
        for candidate in candidates {
            let Some(component) = self.sources().get(candidate)? else {
                continue;
            };
            let Some(latest) = component.latest().cloned() else {
                continue;
            };
            let (_, mut version) = self.sources().load_version(&component, Some(&latest))?;

            let mut changed = false;
            let mut pending = false;
            for dep in &mut version.dependencies {
                let Some(committed) = just_committed.iter().find(|c| **c == dep.id) else {
                    continue;
                };
                let (Some(new), Some(current)) = (&committed.version, &dep.id.version) else {
                    continue;
                };
                if persist && new > current {
                    dep.id = dep.id.with_version(new.clone());
                    changed = true;
                } else if !persist && new >= current {
                    pending = true;
                }
            }
            for dep in &mut version.flattened_dependencies {
                let Some(committed) = just_committed.iter().find(|c| **c == *dep) else {
                    continue;
                };
                let (Some(new), Some(current)) = (&committed.version, &dep.version) else {
                    continue;
                };
                if persist && new > current {
                    *dep = dep.with_version(new.clone());
                    changed = true;
                }
            }

            if persist && changed {
                let (updated, bumped) = self.sources_mut().put_additional_version(
                    &component,
                    version,
                    BUMP_MESSAGE,
                    ReleaseType::Patch,
                )?;
                debug!(id = %updated.to_id(), version = %bumped, "bumped dependent component");
                touched.push(updated.to_id().with_version(bumped));
            } else if !persist && pending {
                touched.push(candidate.without_version().with_version(latest));
            }
        }

        if persist && !touched.is_empty() {
            self.sources_mut().objects_mut().persist()?;
        }
        Ok(touched)
    }
}
