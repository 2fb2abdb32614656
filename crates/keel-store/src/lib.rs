//! Content-addressed object storage for the keel scope engine.
//!
//! This crate provides the two lowest layers of a scope:
//!
//! - The typed object model ([`ScopeObject`] and its variants
//!   [`Component`], [`Version`], [`Source`], [`Symlink`]) with a canonical,
//!   digest-stable encoding.
//! - The on-disk [`Repository`]: an append-mostly store under
//!   `<scope>/objects` with a staging buffer and an atomic [`Repository::persist`].
//!
//! Objects are immutable; every mutation of a component catalog produces a
//! fresh object with a fresh [`ObjectRef`](keel_types::ObjectRef), and the
//! named [`ComponentIndex`] is rewritten atomically alongside it.

pub mod bundle;
pub mod error;
pub mod index;
pub mod object;
pub mod repository;

pub use bundle::ComponentBundle;
pub use error::{StoreError, StoreResult};
pub use index::{ComponentIndex, IndexEntry, IndexKind};
pub use object::{
    frame, split_frame, Component, Dependency, FileEntry, LogEntry, ObjectKind, ScopeObject,
    Source, SpecsResults, Symlink, TestResult, Version,
};
pub use repository::{RawObject, Repository};
