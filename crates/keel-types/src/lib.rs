//! Foundation types for the keel scope engine.
//!
//! This crate provides the identity and versioning primitives used throughout
//! the keel system. Every other keel crate depends on `keel-types`.
//!
//! # Key Types
//!
//! - [`ComponentId`] — scope/namespace/name identifier with an optional version
//! - [`ObjectRef`] — content-addressed identifier (BLAKE3 digest)
//! - [`ReleaseType`] — semver bump policy for new component versions

pub mod error;
pub mod id;
pub mod object_ref;
pub mod release;

pub use error::IdError;
pub use id::{ComponentId, DEFAULT_NAMESPACE};
pub use object_ref::ObjectRef;
pub use release::{first_version, ReleaseType};
