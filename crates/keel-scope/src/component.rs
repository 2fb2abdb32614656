//! Working-copy components and the build/test capability boundary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use keel_sources::SourceFile;
use keel_store::{Dependency, SpecsResults};
use keel_types::ComponentId;

use crate::error::ScopeResult;

/// A component as loaded from a working copy, ready to be ingested.
///
/// The scope never reads the file system of the working copy itself; the
/// caller materializes files into memory and hands them over here.
#[derive(Clone, Debug)]
pub struct WorkingComponent {
    pub id: ComponentId,
    pub main_file: String,
    pub files: Vec<SourceFile>,
    /// Build artifacts; filled by the build phase of ingest when the
    /// pipeline produces any.
    pub dists: Option<Vec<SourceFile>>,
    /// Direct dependencies. Ids may lack versions; ingest fills them from
    /// the resolved latest.
    pub dependencies: Vec<Dependency>,
    pub package_dependencies: BTreeMap<String, String>,
    pub compiler: Option<ComponentId>,
    pub tester: Option<ComponentId>,
}

impl WorkingComponent {
    /// A component with a single main file and no dependencies.
    pub fn new(id: ComponentId, main_file: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let main_file = main_file.into();
        Self {
            id,
            main_file: main_file.clone(),
            files: vec![SourceFile {
                name: main_file.clone(),
                relative_path: main_file,
                content: content.into(),
            }],
            dists: None,
            dependencies: vec![],
            package_dependencies: BTreeMap::new(),
            compiler: None,
            tester: None,
        }
    }

    /// Add a direct dependency.
    pub fn with_dependency(mut self, id: ComponentId, relative_path: impl Into<String>) -> Self {
        self.dependencies.push(Dependency {
            id,
            relative_path: relative_path.into(),
        });
        self
    }
}

/// Build and spec execution, delegated to the embedder.
///
/// The scope drives these in topological order during ingest but does not
/// execute any component code itself.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Build a component in the context of the scope. Returns the produced
    /// dist files, or `None` when the component has no build step.
    async fn build(
        &self,
        component: &WorkingComponent,
        scope_root: &Path,
    ) -> ScopeResult<Option<Vec<SourceFile>>>;

    /// Run a component's specs. Returns `None` when it has none.
    async fn run_specs(
        &self,
        component: &WorkingComponent,
        scope_root: &Path,
    ) -> ScopeResult<Option<SpecsResults>>;
}

/// Pipeline that builds nothing and has no specs.
pub struct NoOpPipeline;

#[async_trait]
impl Pipeline for NoOpPipeline {
    async fn build(
        &self,
        _component: &WorkingComponent,
        _scope_root: &Path,
    ) -> ScopeResult<Option<Vec<SourceFile>>> {
        Ok(None)
    }

    async fn run_specs(
        &self,
        _component: &WorkingComponent,
        _scope_root: &Path,
    ) -> ScopeResult<Option<SpecsResults>> {
        Ok(None)
    }
}

/// Locates the entry module of an environment component (a compiler or
/// tester) on disk, given its imported main file.
#[async_trait]
pub trait ComponentResolver: Send + Sync {
    async fn resolve(
        &self,
        id: &ComponentId,
        main_file: &str,
        scope_root: &Path,
    ) -> ScopeResult<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_pipeline_builds_nothing() {
        let component = WorkingComponent::new("ui/button".parse().unwrap(), "index.js", "x");
        let pipeline = NoOpPipeline;
        assert!(pipeline
            .build(&component, Path::new("/tmp"))
            .await
            .unwrap()
            .is_none());
        assert!(pipeline
            .run_specs(&component, Path::new("/tmp"))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn with_dependency_appends() {
        let component = WorkingComponent::new("ui/button".parse().unwrap(), "index.js", "x")
            .with_dependency("ui/icon".parse().unwrap(), "ui/icon");
        assert_eq!(component.dependencies.len(), 1);
        assert_eq!(component.dependencies[0].relative_path, "ui/icon");
    }
}
