use std::path::PathBuf;

use keel_types::ComponentId;

/// Errors from scope-level operations.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// No scope root was found in the given path or any ancestor.
    #[error("no scope found at {0} or any parent directory")]
    ScopeNotFound(PathBuf),

    /// Refusing to initialize over an existing scope.
    #[error("a scope already exists at {0}")]
    ScopeExists(PathBuf),

    /// A requested component does not resolve locally.
    #[error("component not found: {0}")]
    ComponentNotFound(ComponentId),

    /// A transitive dependency stayed unresolvable after remote fetch.
    #[error("dependency not found: {0}")]
    DependencyNotFound(ComponentId),

    /// The ingest batch contains a dependency cycle.
    #[error("cyclic dependencies between: {}", .0.join(", "))]
    CyclicDependencies(Vec<String>),

    /// Ingest aborted because a component's specs failed.
    #[error("specs failed for {0}")]
    SpecsFailed(ComponentId),

    /// An environment module could not be located or loaded.
    #[error("environment resolution failed: {0}")]
    Resolution(String),

    /// The operation is not valid for the given input.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error(transparent)]
    Sources(#[from] keel_sources::SourcesError),

    #[error(transparent)]
    Remote(#[from] keel_remotes::RemoteError),

    #[error(transparent)]
    Store(#[from] keel_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for scope operations.
pub type ScopeResult<T> = Result<T, ScopeError>;
