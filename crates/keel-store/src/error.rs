use keel_types::ObjectRef;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectRef),

    /// The object data is malformed or its digest does not match its ref.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectRef, reason: String },

    /// An encoded object carries a type tag the registry does not know.
    #[error("unknown object type: {0}")]
    UnknownObjectType(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A transfer bundle is malformed.
    #[error("bad bundle: {0}")]
    BadBundle(String),

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
