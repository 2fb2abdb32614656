use keel_types::ComponentId;
use semver::Version as Semver;

/// Errors from sources-level operations.
#[derive(Debug, thiserror::Error)]
pub enum SourcesError {
    /// The id does not resolve to a component in the local store.
    #[error("component not found: {0}")]
    ComponentNotFound(ComponentId),

    /// The component has no such version.
    #[error("component {id} has no version {version}")]
    VersionNotFound { id: String, version: Semver },

    /// An exact version collides with an already released one.
    #[error("component {id} already has version {version}")]
    VersionExists { id: String, version: Semver },

    /// An exact version must exceed every existing version.
    #[error("version {version} of {id} is not greater than the latest ({latest})")]
    VersionNotGreater {
        id: String,
        version: Semver,
        latest: Semver,
    },

    /// Two catalogs disagree on the ref for the same version.
    #[error("merge conflict on {id}@{version}: incoming ref differs from local")]
    MergeConflict { id: String, version: Semver },

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] keel_store::StoreError),
}

/// Result alias for sources operations.
pub type SourcesResult<T> = Result<T, SourcesError>;
