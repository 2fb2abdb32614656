//! Abstract remote-scope binding for keel.
//!
//! The core consumes exactly two remote operations: [`Remote::fetch`] and
//! [`Remote::push_many`]. The wire transport behind them is not this
//! crate's concern; [`InMemoryRemote`] provides a process-local transport
//! for tests and embedding.

pub mod error;
pub mod memory;
pub mod registry;
pub mod remote;

pub use error::{RemoteError, RemoteResult};
pub use memory::InMemoryRemote;
pub use registry::RemoteRegistry;
pub use remote::Remote;
