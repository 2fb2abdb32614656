use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use keel_store::{ComponentBundle, ScopeObject};
use keel_types::{ComponentId, ObjectRef};

use crate::error::{RemoteError, RemoteResult};
use crate::remote::Remote;

/// Process-local remote holding pushed bundles in memory.
///
/// Intended for tests and embedding. Bundles are keyed by the component's
/// id-string; a later push for the same id replaces the stored bundle.
pub struct InMemoryRemote {
    name: String,
    bundles: RwLock<BTreeMap<String, ComponentBundle>>,
    deny_push: AtomicBool,
}

impl InMemoryRemote {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundles: RwLock::new(BTreeMap::new()),
            deny_push: AtomicBool::new(false),
        }
    }

    /// Make subsequent pushes fail with `PermissionDenied`.
    pub fn set_deny_push(&self, deny: bool) {
        self.deny_push.store(deny, Ordering::SeqCst);
    }

    /// Number of components held.
    pub fn len(&self) -> usize {
        self.bundles.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.read().expect("lock poisoned").is_empty()
    }

    /// Reduce a bundle to its head version and that version's sources.
    fn head_only(bundle: &ComponentBundle) -> RemoteResult<ComponentBundle> {
        let component = match bundle.component()? {
            ScopeObject::Component(c) => c,
            _ => return Ok(bundle.clone()),
        };
        let Some(head_ref) = component.latest().and_then(|v| component.version_ref(v)) else {
            return Ok(bundle.clone());
        };

        let mut keep: Vec<Vec<u8>> = Vec::new();
        let mut wanted_sources: Vec<ObjectRef> = Vec::new();
        for bytes in &bundle.objects {
            if ObjectRef::from_bytes(bytes) == head_ref {
                if let ScopeObject::Version(version) = ScopeObject::decode(bytes)? {
                    wanted_sources = version.source_refs();
                }
                keep.push(bytes.clone());
            }
        }
        for bytes in &bundle.objects {
            if wanted_sources.contains(&ObjectRef::from_bytes(bytes)) {
                keep.push(bytes.clone());
            }
        }
        Ok(ComponentBundle::new(bundle.component.clone(), keep))
    }
}

#[async_trait]
impl Remote for InMemoryRemote {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        ids: &[ComponentId],
        only_head: bool,
    ) -> RemoteResult<Vec<ComponentBundle>> {
        let bundles = self.bundles.read().expect("lock poisoned");
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let key = id.to_string_without_version();
            let bundle = bundles
                .get(&key)
                .ok_or_else(|| RemoteError::ComponentNotFound(key.clone()))?;
            out.push(if only_head {
                Self::head_only(bundle)?
            } else {
                bundle.clone()
            });
        }
        debug!(remote = %self.name, count = out.len(), only_head, "served fetch");
        Ok(out)
    }

    async fn push_many(&self, bundles: Vec<ComponentBundle>) -> RemoteResult<Vec<String>> {
        if self.deny_push.load(Ordering::SeqCst) {
            return Err(RemoteError::PermissionDenied(self.name.clone()));
        }

        // Validate every bundle before accepting any, so the push is
        // all-or-nothing.
        let mut keyed = Vec::with_capacity(bundles.len());
        for bundle in bundles {
            let key = bundle.component_id()?.to_string_without_version();
            keyed.push((key, bundle));
        }

        let mut stored = self.bundles.write().expect("lock poisoned");
        let mut accepted = Vec::with_capacity(keyed.len());
        for (key, bundle) in keyed {
            stored.insert(key.clone(), bundle);
            accepted.push(key);
        }
        debug!(remote = %self.name, count = accepted.len(), "accepted push");
        Ok(accepted)
    }
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRemote")
            .field("name", &self.name)
            .field("components", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_store::{Component, Source};
    use semver::Version as Semver;

    fn bundle_for(id: &str, content: &[u8]) -> ComponentBundle {
        let source = ScopeObject::Source(Source::new(content.to_vec()));
        let source_bytes = source.encode().unwrap();

        let version = ScopeObject::Version(keel_store::Version {
            main_file: "index.js".into(),
            files: vec![keel_store::FileEntry {
                name: "index.js".into(),
                relative_path: "index.js".into(),
                file: ObjectRef::from_bytes(&source_bytes),
            }],
            dists: None,
            dependencies: vec![],
            flattened_dependencies: vec![],
            package_dependencies: Default::default(),
            compiler: None,
            tester: None,
            log: keel_store::LogEntry {
                message: "m".into(),
                date: chrono_now(),
                author: None,
            },
            specs_results: None,
        });
        let version_bytes = version.encode().unwrap();

        let mut component = Component::from_id(&id.parse().unwrap());
        component.add_version(
            Semver::new(0, 0, 1),
            ObjectRef::from_bytes(&version_bytes),
        );
        ComponentBundle::new(
            ScopeObject::Component(component).encode().unwrap(),
            vec![version_bytes, source_bytes],
        )
    }

    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    #[tokio::test]
    async fn push_then_fetch_roundtrip() {
        let remote = InMemoryRemote::new("remote1");
        let bundle = bundle_for("remote1/ui/button", b"hello");
        let accepted = remote.push_many(vec![bundle.clone()]).await.unwrap();
        assert_eq!(accepted, vec!["remote1/ui/button".to_string()]);

        let id: ComponentId = "remote1/ui/button".parse().unwrap();
        let fetched = remote.fetch(&[id], false).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0], bundle);
    }

    #[tokio::test]
    async fn fetch_missing_component_fails() {
        let remote = InMemoryRemote::new("remote1");
        let id: ComponentId = "remote1/ui/ghost".parse().unwrap();
        assert!(matches!(
            remote.fetch(&[id], false).await.unwrap_err(),
            RemoteError::ComponentNotFound(_)
        ));
    }

    #[tokio::test]
    async fn denied_push_fails_without_storing() {
        let remote = InMemoryRemote::new("remote1");
        remote.set_deny_push(true);
        let err = remote
            .push_many(vec![bundle_for("remote1/ui/button", b"x")])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::PermissionDenied(_)));
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn head_only_fetch_trims_objects() {
        let remote = InMemoryRemote::new("remote1");
        remote
            .push_many(vec![bundle_for("remote1/ui/button", b"hello")])
            .await
            .unwrap();

        let id: ComponentId = "remote1/ui/button".parse().unwrap();
        let fetched = remote.fetch(&[id], true).await.unwrap();
        // One version plus one source survive the trim.
        assert_eq!(fetched[0].objects.len(), 2);
    }
}
