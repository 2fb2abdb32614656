use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RemoteError, RemoteResult};
use crate::remote::Remote;

/// Name-keyed collection of remotes.
///
/// A scope resolves remotes against the composition of a process-wide
/// registry and its own scope-local one; the scope-local entry wins on a
/// name collision.
#[derive(Clone, Default)]
pub struct RemoteRegistry {
    remotes: BTreeMap<String, Arc<dyn Remote>>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remote under its own name, replacing any previous entry.
    pub fn add(&mut self, remote: Arc<dyn Remote>) {
        self.remotes.insert(remote.name().to_string(), remote);
    }

    /// Compose two registries; entries from `local` shadow `global`.
    pub fn compose(global: &Self, local: &Self) -> Self {
        let mut remotes = global.remotes.clone();
        remotes.extend(local.remotes.clone());
        Self { remotes }
    }

    /// Look up a remote by name.
    pub fn resolve(&self, name: &str) -> RemoteResult<Arc<dyn Remote>> {
        self.remotes
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::RemoteScopeNotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.remotes.keys().cloned().collect()
    }

    /// Every registered remote except the named one, in name order. Used as
    /// the fallback list when a fetch from the primary remote fails.
    pub fn others(&self, except: &str) -> Vec<Arc<dyn Remote>> {
        self.remotes
            .iter()
            .filter(|(name, _)| name.as_str() != except)
            .map(|(_, remote)| remote.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}

impl std::fmt::Debug for RemoteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRegistry")
            .field("names", &self.names())
            .finish()
    }
}
