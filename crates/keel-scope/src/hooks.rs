//! Post-operation hooks.
//!
//! Hooks are notifications to the embedder (indexers, loggers, the
//! consumer's working copy). A hook failure is logged and never fails the
//! operation that triggered it.

use async_trait::async_trait;

use crate::error::ScopeResult;

/// Capability invoked after scope operations complete, with the affected
/// component id strings.
#[async_trait]
pub trait ScopeHooks: Send + Sync {
    async fn post_export(&self, _ids: &[String]) -> ScopeResult<()> {
        Ok(())
    }

    async fn post_import(&self, _ids: &[String]) -> ScopeResult<()> {
        Ok(())
    }

    async fn post_deprecate(&self, _ids: &[String]) -> ScopeResult<()> {
        Ok(())
    }

    async fn post_remove(&self, _ids: &[String]) -> ScopeResult<()> {
        Ok(())
    }

    /// Invoked after `reset` so the consumer can drop the working copy of
    /// the removed version.
    async fn post_reset(&self, _ids: &[String]) -> ScopeResult<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
pub struct NoOpHooks;

#[async_trait]
impl ScopeHooks for NoOpHooks {}
