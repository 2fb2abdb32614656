//! Logical-component operations over the keel object repository.
//!
//! Where `keel-store` deals in refs and blobs, this crate deals in
//! components: adding a new source revision ([`Sources::add_source`]),
//! merging an incoming object bundle ([`Sources::merge`]), gathering a
//! component's full object closure ([`Sources::get_objects`]) and removing
//! versions or whole components ([`Sources::clean`]).

pub mod error;
pub mod sources;

pub use error::{SourcesError, SourcesResult};
pub use sources::{AddSource, ComponentObjects, SourceFile, Sources};
