//! The component index: a named, mutable pointer layer over the immutable
//! object store.
//!
//! Content-addressed objects cannot be found by component id alone, so the
//! repository keeps `objects/index.json`: a key-sorted map from id-string to
//! the ref of the current catalog head for that id. The index is rewritten
//! atomically (temp file + rename) on every persist that touched it; a crash
//! before the rename leaves the previous index — and therefore the previous
//! observable scope state — intact.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use keel_types::ObjectRef;

use crate::error::{StoreError, StoreResult};

/// What an index entry points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Component,
    Symlink,
}

/// One index entry: the current head ref for an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub reference: ObjectRef,
    pub kind: IndexKind,
}

/// In-memory form of `objects/index.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl ComponentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from disk; a missing file is an empty index.
    pub fn load(path: &Path) -> StoreResult<Self> {
        match std::fs::read(path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialized form written to disk.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, reference: ObjectRef, kind: IndexKind) {
        self.entries.insert(key.into(), IndexEntry { reference, kind });
    }

    /// Drop the entry for a key. Returns `true` if one existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop whichever entry currently points at `reference`.
    ///
    /// Used when a staged object removal targets a catalog head: if the head
    /// has already been repointed at a newer ref, the entry is left alone.
    pub fn remove_by_ref(&mut self, reference: &ObjectRef) -> bool {
        let key = self
            .entries
            .iter()
            .find(|(_, entry)| entry.reference == *reference)
            .map(|(k, _)| k.clone());
        match key {
            Some(k) => self.entries.remove(&k).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(data: &[u8]) -> ObjectRef {
        ObjectRef::from_bytes(data)
    }

    #[test]
    fn set_and_get() {
        let mut index = ComponentIndex::new();
        index.set("ui/button", r(b"a"), IndexKind::Component);
        let entry = index.get("ui/button").unwrap();
        assert_eq!(entry.reference, r(b"a"));
        assert_eq!(entry.kind, IndexKind::Component);
    }

    #[test]
    fn set_replaces_existing() {
        let mut index = ComponentIndex::new();
        index.set("ui/button", r(b"a"), IndexKind::Component);
        index.set("ui/button", r(b"b"), IndexKind::Component);
        assert_eq!(index.get("ui/button").unwrap().reference, r(b"b"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_by_ref_only_matches_current_head() {
        let mut index = ComponentIndex::new();
        index.set("ui/button", r(b"new"), IndexKind::Component);
        // Removing the superseded ref must not unlink the repointed entry.
        assert!(!index.remove_by_ref(&r(b"old")));
        assert!(index.get("ui/button").is_some());
        assert!(index.remove_by_ref(&r(b"new")));
        assert!(index.is_empty());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = ComponentIndex::load(&dir.path().join("index.json")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn bytes_roundtrip() {
        let mut index = ComponentIndex::new();
        index.set("ui/button", r(b"a"), IndexKind::Component);
        index.set("ui/icon", r(b"b"), IndexKind::Symlink);
        let bytes = index.to_bytes().unwrap();
        let parsed: ComponentIndex = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(index, parsed);
    }
}
