//! The ingest pipeline: persist new versions of a batch of working-copy
//! components.
//!
//! Four phases over a topologically sorted batch, leaves first: build, spec
//! run, persistence of each component (with flattened-dependency
//! resolution), then one atomic repository persist. Build and spec phases
//! run strictly sequentially; parallelizing them would race on shared
//! package installation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use semver::Version as Semver;
use tracing::debug;

use keel_sources::AddSource;
use keel_store::SpecsResults;
use keel_types::{ComponentId, ReleaseType};

use crate::component::WorkingComponent;
use crate::error::{ScopeError, ScopeResult};
use crate::scope::Scope;

/// Inputs to [`Scope::put_many`].
pub struct PutManyRequest {
    pub components: Vec<WorkingComponent>,
    pub message: String,
    pub author: Option<String>,
    /// When given, every component in the batch releases exactly this
    /// version; it must exceed each component's existing versions.
    pub exact_version: Option<Semver>,
    pub release_type: ReleaseType,
    /// Persist even when specs fail.
    pub force: bool,
    pub verbose: bool,
}

impl PutManyRequest {
    pub fn new(components: Vec<WorkingComponent>, message: impl Into<String>) -> Self {
        Self {
            components,
            message: message.into(),
            author: None,
            exact_version: None,
            release_type: ReleaseType::Patch,
            force: false,
            verbose: false,
        }
    }
}

impl Scope {
    /// Ingest a batch of working-copy components, assigning each a new
    /// version. Nothing is durable until the final persist; a failure in
    /// any earlier phase leaves the on-disk scope untouched.
    pub async fn put_many(&mut self, request: PutManyRequest) -> ScopeResult<Vec<ComponentId>> {
        if request.components.is_empty() {
            return Ok(Vec::new());
        }

        let mut components = request.components;
        let order = topological_order(&components)?;

        // Build phase, leaves first, strictly sequential.
        let pipeline = self.pipeline();
        for &idx in &order {
            let root = self.root().to_path_buf();
            if let Some(dists) = pipeline.build(&components[idx], &root).await? {
                components[idx].dists = Some(dists);
            }
            if request.verbose {
                debug!(id = %components[idx].id, "built component");
            }
        }

        // Spec phase; abort before any persistence unless forced.
        let mut specs: Vec<Option<SpecsResults>> = vec![None; components.len()];
        for &idx in &order {
            let root = self.root().to_path_buf();
            let results = pipeline.run_specs(&components[idx], &root).await?;
            if let Some(results) = &results {
                if !results.pass && !request.force {
                    return Err(ScopeError::SpecsFailed(components[idx].id.clone()));
                }
            }
            specs[idx] = results;
        }

        // Persist phase. Versions assigned earlier in the batch are visible
        // to later components through `batch_versions`; flattened closures
        // are memoized across the batch by dep id-string.
        let mut batch_versions: HashMap<String, Semver> = HashMap::new();
        let mut closure_memo: HashMap<String, Vec<ComponentId>> = HashMap::new();
        let mut committed = Vec::with_capacity(components.len());

        for &idx in &order {
            let component = &components[idx];
            let mut dependencies = component.dependencies.clone();
            let mut flattened: Vec<ComponentId> = Vec::new();

            for dep in &mut dependencies {
                let filled = self
                    .fill_dependency_version(&dep.id, &batch_versions)
                    .await?;
                let closure = self.flattened_closure(&filled, &mut closure_memo).await?;
                flattened.extend(closure);
                dep.id = filled;
            }

            let (catalog, assigned) = self.sources_mut().add_source(AddSource {
                id: component.id.without_version(),
                main_file: component.main_file.clone(),
                files: component.files.clone(),
                dists: component.dists.clone(),
                dependencies,
                flattened_dependencies: flattened,
                package_dependencies: component.package_dependencies.clone(),
                compiler: component.compiler.clone(),
                tester: component.tester.clone(),
                message: request.message.clone(),
                author: request.author.clone(),
                exact_version: request.exact_version.clone(),
                release_type: request.release_type,
                specs_results: specs[idx].take(),
            })?;

            batch_versions.insert(
                component.id.to_string_without_version(),
                assigned.clone(),
            );
            // Later components in the batch observe the bump.
            components[idx].id = components[idx].id.with_version(assigned.clone());
            committed.push(catalog.to_id().with_version(assigned));
        }

        self.sources_mut().objects_mut().persist()?;
        debug!(count = committed.len(), "ingested batch");
        Ok(committed)
    }

    /// Give an unversioned dependency id its version: the one just assigned
    /// in this batch, or the resolved latest otherwise.
    async fn fill_dependency_version(
        &mut self,
        id: &ComponentId,
        batch_versions: &HashMap<String, Semver>,
    ) -> ScopeResult<ComponentId> {
        if id.version.is_some() {
            return Ok(id.clone());
        }
        if let Some(version) = batch_versions.get(&id.to_string_without_version()) {
            return Ok(id.with_version(version.clone()));
        }
        let component = self
            .resolve_component(id)
            .await?
            .ok_or_else(|| ScopeError::DependencyNotFound(id.clone()))?;
        let latest = component
            .latest()
            .ok_or_else(|| ScopeError::DependencyNotFound(id.clone()))?;
        Ok(id.with_version(latest.clone()))
    }

    /// The dependency itself plus its recorded flattened closure, memoized
    /// across the batch.
    async fn flattened_closure(
        &mut self,
        id: &ComponentId,
        memo: &mut HashMap<String, Vec<ComponentId>>,
    ) -> ScopeResult<Vec<ComponentId>> {
        let key = id.to_string_with_version();
        if let Some(closure) = memo.get(&key) {
            return Ok(closure.clone());
        }

        let component = self
            .resolve_component(id)
            .await?
            .ok_or_else(|| ScopeError::DependencyNotFound(id.clone()))?;
        let version = id
            .version
            .clone()
            .or_else(|| component.latest().cloned())
            .ok_or_else(|| ScopeError::DependencyNotFound(id.clone()))?;
        let (_, body) = self
            .sources()
            .load_version(&component, Some(&version))
            .map_err(|_| ScopeError::DependencyNotFound(id.clone()))?;

        let mut closure = vec![id.with_version(version)];
        closure.extend(body.flattened_dependencies.clone());
        memo.insert(key, closure.clone());
        Ok(closure)
    }

    /// Resolve a dependency's catalog, fetching from its remote when it is
    /// external and absent locally.
    pub(crate) async fn resolve_component(
        &mut self,
        id: &ComponentId,
    ) -> ScopeResult<Option<keel_store::Component>> {
        if let Some(component) = self.sources().get(id)? {
            return Ok(Some(component));
        }
        if self.is_local(id) {
            return Ok(None);
        }
        self.fetch_external(std::slice::from_ref(id), false).await?;
        Ok(self.sources().get(id)?)
    }
}

/// Kahn's algorithm over the intra-batch dependency graph, keyed by
/// id-without-version. Leaves (components with no in-batch dependencies)
/// come first; ties resolve in input order.
fn topological_order(components: &[WorkingComponent]) -> ScopeResult<Vec<usize>> {
    let position: BTreeMap<String, usize> = components
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.to_string_without_version(), i))
        .collect();

    let mut in_degree = vec![0usize; components.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); components.len()];
    for (i, component) in components.iter().enumerate() {
        for dep in &component.dependencies {
            if let Some(&dep_idx) = position.get(&dep.id.to_string_without_version()) {
                if dep_idx != i {
                    in_degree[i] += 1;
                    dependents[dep_idx].push(i);
                }
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..components.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(components.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != components.len() {
        let stuck: Vec<String> = (0..components.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| components[i].id.to_string_without_version())
            .collect();
        return Err(ScopeError::CyclicDependencies(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(id: &str, deps: &[&str]) -> WorkingComponent {
        let mut c = WorkingComponent::new(id.parse().unwrap(), "index.js", "x");
        for dep in deps {
            c = c.with_dependency(dep.parse().unwrap(), *dep);
        }
        c
    }

    #[test]
    fn leaves_come_first() {
        let batch = vec![
            component("ui/app", &["ui/button", "ui/icon"]),
            component("ui/button", &["ui/icon"]),
            component("ui/icon", &[]),
        ];
        let order = topological_order(&batch).unwrap();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn out_of_batch_dependencies_are_ignored() {
        let batch = vec![component("ui/app", &["remote1/ui/runtime"])];
        assert_eq!(topological_order(&batch).unwrap(), vec![0]);
    }

    #[test]
    fn independent_components_keep_input_order() {
        let batch = vec![component("ui/a", &[]), component("ui/b", &[])];
        assert_eq!(topological_order(&batch).unwrap(), vec![0, 1]);
    }

    #[test]
    fn cycles_are_rejected() {
        let batch = vec![
            component("ui/a", &["ui/b"]),
            component("ui/b", &["ui/a"]),
        ];
        let err = topological_order(&batch).unwrap_err();
        match err {
            ScopeError::CyclicDependencies(ids) => {
                assert_eq!(ids.len(), 2);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn self_reference_does_not_count() {
        let batch = vec![component("ui/a", &["ui/a"])];
        assert_eq!(topological_order(&batch).unwrap(), vec![0]);
    }
}
