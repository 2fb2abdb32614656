//! The keel scope facade.
//!
//! A [`Scope`] owns one on-disk object store plus its metadata and
//! orchestrates every operation over it:
//!
//! - ingest of working-copy components ([`Scope::put_many`])
//! - resolution with remote materialization ([`Scope::import_many`])
//! - publication to a named remote ([`Scope::export_many`])
//! - deprecation, removal and version reset
//! - dependency auto-bump and on-disk format migration
//!
//! Builds, spec runs, hooks and environment resolution are capabilities
//! injected at construction; the scope invokes them but never implements
//! them.

pub mod bump;
pub mod component;
pub mod descriptor;
pub mod error;
pub mod export;
pub mod hooks;
pub mod import;
pub mod ingest;
pub mod migration;
pub mod scope;

pub use component::{ComponentResolver, NoOpPipeline, Pipeline, WorkingComponent};
pub use descriptor::ScopeDescriptor;
pub use error::{ScopeError, ScopeResult};
pub use hooks::{NoOpHooks, ScopeHooks};
pub use import::{ComponentVersion, VersionDependencies};
pub use ingest::PutManyRequest;
pub use migration::{Migration, MigrationResult, ObjectTransform};
pub use scope::{RemovedComponents, Scope, ScopeOptions};
