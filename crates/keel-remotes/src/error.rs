use thiserror::Error;

/// Errors from the remotes layer.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// No remote is registered under the given name.
    #[error("remote scope not found: {0}")]
    RemoteScopeNotFound(String),

    /// The remote refused the operation.
    #[error("permission denied by remote: {0}")]
    PermissionDenied(String),

    /// The remote does not hold the requested component.
    #[error("component not found on remote: {0}")]
    ComponentNotFound(String),

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A bundle failed to decode.
    #[error(transparent)]
    Store(#[from] keel_store::StoreError),
}

/// Result alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;
