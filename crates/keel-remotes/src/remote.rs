use async_trait::async_trait;

use keel_store::ComponentBundle;
use keel_types::ComponentId;

use crate::error::RemoteResult;

/// One remote scope, addressed by name.
///
/// These two operations are the whole surface the core depends on. A
/// transport may suspend arbitrarily; implementations must not require the
/// caller to hold any lock across a call.
#[async_trait]
pub trait Remote: Send + Sync + std::fmt::Debug {
    /// The name this remote is registered under.
    fn name(&self) -> &str;

    /// Fetch the requested components, either with their full object
    /// closure or, when `only_head`, with just the latest version and its
    /// sources.
    async fn fetch(
        &self,
        ids: &[ComponentId],
        only_head: bool,
    ) -> RemoteResult<Vec<ComponentBundle>>;

    /// Push component bundles. Atomic on the remote side: either every
    /// bundle is accepted or none is. Returns the accepted id strings.
    async fn push_many(&self, bundles: Vec<ComponentBundle>) -> RemoteResult<Vec<String>>;
}
