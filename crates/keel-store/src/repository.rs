//! The on-disk content-addressed object repository.
//!
//! Objects live under `<scope>/objects` as zstd-compressed canonical
//! encodings, keyed by hex digest split into a 2-character prefix directory
//! and the remaining characters as the file name. Mutations are staged in
//! memory and hit the disk only on [`Repository::persist`], which writes
//! through `<scope>/tmp` and renames into place so a crash mid-persist
//! leaves the previously persisted state observable.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use keel_types::{ComponentId, ObjectRef};

use crate::error::{StoreError, StoreResult};
use crate::index::{ComponentIndex, IndexKind};
use crate::object::{split_frame, ObjectKind, ScopeObject};

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";
const INDEX_FILE: &str = "index.json";
const COMPRESSION_LEVEL: i32 = 3;

/// An object's framed bytes plus its type tag, without payload decode.
/// This is what the migration runner operates on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawObject {
    pub reference: ObjectRef,
    pub tag: String,
    pub bytes: Vec<u8>,
}

impl RawObject {
    /// Wrap framed bytes, computing the ref and extracting the tag.
    pub fn from_encoded(bytes: Vec<u8>) -> StoreResult<Self> {
        let reference = ObjectRef::from_bytes(&bytes);
        let (tag, _) = split_frame(&bytes)?;
        Ok(Self {
            reference,
            tag: tag.to_string(),
            bytes,
        })
    }
}

/// Content-addressed, append-mostly object store for one scope.
///
/// Owned exclusively by one scope for its lifetime; no inter-process locking
/// is attempted.
pub struct Repository {
    root: PathBuf,
    staged_add: BTreeMap<ObjectRef, Vec<u8>>,
    staged_remove: BTreeSet<ObjectRef>,
    index: ComponentIndex,
    index_dirty: bool,
}

impl Repository {
    /// Open the repository rooted at a scope directory, loading the
    /// component index if one exists.
    pub fn open(scope_root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = scope_root.into();
        let index = ComponentIndex::load(&root.join(OBJECTS_DIR).join(INDEX_FILE))?;
        Ok(Self {
            root,
            staged_add: BTreeMap::new(),
            staged_remove: BTreeSet::new(),
            index,
            index_dirty: false,
        })
    }

    pub fn scope_root(&self) -> &Path {
        &self.root
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    fn object_path(&self, reference: &ObjectRef) -> PathBuf {
        let hex = reference.to_hex();
        self.objects_dir().join(&hex[..2]).join(&hex[2..])
    }

    /// The current id-to-head index.
    pub fn index(&self) -> &ComponentIndex {
        &self.index
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    /// Stage a typed object for persistence. Idempotent by digest.
    ///
    /// Staging a `Component` or `Symlink` repoints the index entry for its id
    /// at the new ref.
    pub fn add(&mut self, object: &ScopeObject) -> StoreResult<ObjectRef> {
        let encoded = object.encode()?;
        let reference = ObjectRef::from_bytes(&encoded);
        self.staged_remove.remove(&reference);
        self.staged_add.insert(reference, encoded);

        match object {
            ScopeObject::Component(c) => {
                self.index.set(
                    c.to_id().to_string_without_version(),
                    reference,
                    IndexKind::Component,
                );
                self.index_dirty = true;
            }
            ScopeObject::Symlink(s) => {
                self.index.set(
                    s.to_id().to_string_without_version(),
                    reference,
                    IndexKind::Symlink,
                );
                self.index_dirty = true;
            }
            _ => {}
        }

        debug!(reference = %reference.short_hex(), kind = %object.kind(), "staged object");
        Ok(reference)
    }

    pub fn add_many<'a>(
        &mut self,
        objects: impl IntoIterator<Item = &'a ScopeObject>,
    ) -> StoreResult<Vec<ObjectRef>> {
        objects.into_iter().map(|obj| self.add(obj)).collect()
    }

    /// Stage already-framed bytes without decoding the payload. Used by the
    /// migration runner. The index is updated when the tag names a catalog
    /// object.
    pub fn add_raw(&mut self, bytes: Vec<u8>) -> StoreResult<ObjectRef> {
        let raw = RawObject::from_encoded(bytes)?;
        match ObjectKind::from_tag(&raw.tag) {
            Some(ObjectKind::Component) | Some(ObjectKind::Symlink) => {
                // Decode fully so the index key can be derived.
                let object = ScopeObject::decode(&raw.bytes)?;
                self.add(&object)
            }
            Some(_) => {
                self.staged_remove.remove(&raw.reference);
                let reference = raw.reference;
                self.staged_add.insert(reference, raw.bytes);
                Ok(reference)
            }
            None => Err(StoreError::UnknownObjectType(raw.tag)),
        }
    }

    /// Stage removal of an object. Unlinks the index entry pointing at the
    /// ref, if that entry has not been repointed since.
    pub fn remove(&mut self, reference: &ObjectRef) {
        self.staged_add.remove(reference);
        self.staged_remove.insert(*reference);
        if self.index.remove_by_ref(reference) {
            self.index_dirty = true;
        }
        debug!(reference = %reference.short_hex(), "staged removal");
    }

    pub fn remove_many(&mut self, references: &[ObjectRef]) {
        for reference in references {
            self.remove(reference);
        }
    }

    /// True when the ref resolves right now, staged or persisted.
    pub fn has(&self, reference: &ObjectRef) -> bool {
        if self.staged_remove.contains(reference) {
            return false;
        }
        self.staged_add.contains_key(reference) || self.object_path(reference).exists()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Load and decode an object, staged additions first.
    pub fn load(&self, reference: &ObjectRef) -> StoreResult<ScopeObject> {
        ScopeObject::decode(&self.load_encoded(reference)?)
    }

    /// Load an object's framed bytes and tag without decoding the payload.
    pub fn load_raw(&self, reference: &ObjectRef) -> StoreResult<RawObject> {
        RawObject::from_encoded(self.load_encoded(reference)?)
    }

    fn load_encoded(&self, reference: &ObjectRef) -> StoreResult<Vec<u8>> {
        if self.staged_remove.contains(reference) {
            return Err(StoreError::ObjectNotFound(*reference));
        }
        if let Some(bytes) = self.staged_add.get(reference) {
            return Ok(bytes.clone());
        }

        let path = self.object_path(reference);
        let compressed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::ObjectNotFound(*reference))
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = zstd::decode_all(compressed.as_slice()).map_err(|e| {
            StoreError::CorruptObject {
                id: *reference,
                reason: format!("decompression failed: {e}"),
            }
        })?;

        // The digest of the uncompressed framed bytes is the identity.
        let computed = ObjectRef::from_bytes(&bytes);
        if computed != *reference {
            return Err(StoreError::CorruptObject {
                id: *reference,
                reason: format!("digest mismatch, computed {}", computed.short_hex()),
            });
        }
        Ok(bytes)
    }

    /// Resolve the current catalog head for an id. Returns the decoded
    /// `Component` or `Symlink`, or `None` when the id is unknown.
    pub fn load_by_id(&self, id: &ComponentId) -> StoreResult<Option<ScopeObject>> {
        match self.index.get(&id.to_string_without_version()) {
            Some(entry) => Ok(Some(self.load(&entry.reference)?)),
            None => Ok(None),
        }
    }

    /// All persisted object refs, by directory scan.
    pub fn list_refs(&self) -> StoreResult<Vec<ObjectRef>> {
        let objects = self.objects_dir();
        let mut refs = Vec::new();
        if !objects.exists() {
            return Ok(refs);
        }
        for prefix_entry in fs::read_dir(&objects)? {
            let prefix_entry = prefix_entry?;
            if !prefix_entry.file_type()?.is_dir() {
                continue;
            }
            let prefix = prefix_entry.file_name();
            let Some(prefix) = prefix.to_str() else { continue };
            if prefix.len() != 2 {
                continue;
            }
            for file_entry in fs::read_dir(prefix_entry.path())? {
                let file_entry = file_entry?;
                let name = file_entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Ok(reference) = ObjectRef::from_hex(&format!("{prefix}{name}")) {
                    refs.push(reference);
                }
            }
        }
        refs.sort();
        Ok(refs)
    }

    /// Every persisted object in raw form, for migration.
    pub fn list_raw_objects(&self) -> StoreResult<Vec<RawObject>> {
        self.list_refs()?
            .iter()
            .map(|reference| self.load_raw(reference))
            .collect()
    }

    /// Every persisted catalog object, by directory scan.
    pub fn list_components(&self, include_symlinks: bool) -> StoreResult<Vec<ScopeObject>> {
        let mut components = Vec::new();
        for reference in self.list_refs()? {
            match self.load(&reference)? {
                obj @ ScopeObject::Component(_) => components.push(obj),
                obj @ ScopeObject::Symlink(_) if include_symlinks => components.push(obj),
                _ => {}
            }
        }
        Ok(components)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Atomically flush staged additions and removals.
    ///
    /// Additions are compressed, written to `tmp/`, fsynced and renamed into
    /// `objects/`; then the index is rewritten the same way; removals are
    /// unlinked last. Until the index rename lands, readers observe the
    /// prior persisted state (freshly renamed objects are unreachable).
    pub fn persist(&mut self) -> StoreResult<()> {
        if self.staged_add.is_empty() && self.staged_remove.is_empty() && !self.index_dirty {
            return Ok(());
        }

        let objects = self.objects_dir();
        let tmp = self.tmp_dir();
        fs::create_dir_all(&objects)?;
        fs::create_dir_all(&tmp)?;

        let mut pending: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(self.staged_add.len());
        for (reference, bytes) in &self.staged_add {
            let compressed =
                zstd::encode_all(bytes.as_slice(), COMPRESSION_LEVEL).map_err(StoreError::Io)?;
            let tmp_path = tmp.join(reference.to_hex());
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;

            let final_path = self.object_path(reference);
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent)?;
            }
            pending.push((tmp_path, final_path));
        }

        for (tmp_path, final_path) in pending {
            fs::rename(tmp_path, final_path)?;
        }

        if self.index_dirty || !objects.join(INDEX_FILE).exists() {
            let index_tmp = tmp.join(INDEX_FILE);
            let mut file = File::create(&index_tmp)?;
            file.write_all(&self.index.to_bytes()?)?;
            file.sync_all()?;
            fs::rename(index_tmp, objects.join(INDEX_FILE))?;
        }

        for reference in &self.staged_remove {
            match fs::remove_file(self.object_path(reference)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        debug!(
            added = self.staged_add.len(),
            removed = self.staged_remove.len(),
            "persisted staged changes"
        );
        self.staged_add.clear();
        self.staged_remove.clear();
        self.index_dirty = false;
        Ok(())
    }

    /// Drop all staged changes and reload the index from disk.
    pub fn discard_staged(&mut self) -> StoreResult<()> {
        self.staged_add.clear();
        self.staged_remove.clear();
        self.index = ComponentIndex::load(&self.objects_dir().join(INDEX_FILE))?;
        self.index_dirty = false;
        Ok(())
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .field("staged_add", &self.staged_add.len())
            .field("staged_remove", &self.staged_remove.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Component, Source, Symlink};

    fn temp_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        (dir, repo)
    }

    fn source(content: &[u8]) -> ScopeObject {
        ScopeObject::Source(Source::new(content.to_vec()))
    }

    #[test]
    fn add_persist_load_roundtrip() {
        let (_dir, mut repo) = temp_repo();
        let obj = source(b"hello");
        let reference = repo.add(&obj).unwrap();
        repo.persist().unwrap();

        let loaded = repo.load(&reference).unwrap();
        assert_eq!(loaded, obj);
    }

    #[test]
    fn staged_objects_load_before_persist() {
        let (_dir, mut repo) = temp_repo();
        let reference = repo.add(&source(b"staged")).unwrap();
        assert!(repo.has(&reference));
        assert!(repo.load(&reference).is_ok());
    }

    #[test]
    fn load_missing_fails() {
        let (_dir, repo) = temp_repo();
        let missing = ObjectRef::from_bytes(b"nope");
        let err = repo.load(&missing).unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound(_)));
    }

    #[test]
    fn add_is_idempotent_by_digest() {
        let (_dir, mut repo) = temp_repo();
        let r1 = repo.add(&source(b"same")).unwrap();
        let r2 = repo.add(&source(b"same")).unwrap();
        assert_eq!(r1, r2);
        repo.persist().unwrap();
        assert_eq!(repo.list_refs().unwrap().len(), 1);
    }

    #[test]
    fn staged_removal_hides_object() {
        let (_dir, mut repo) = temp_repo();
        let reference = repo.add(&source(b"doomed")).unwrap();
        repo.persist().unwrap();

        repo.remove(&reference);
        assert!(!repo.has(&reference));
        assert!(matches!(
            repo.load(&reference).unwrap_err(),
            StoreError::ObjectNotFound(_)
        ));

        repo.persist().unwrap();
        assert!(!repo.object_path(&reference).exists());
    }

    #[test]
    fn nothing_on_disk_before_persist() {
        let (_dir, mut repo) = temp_repo();
        let reference = repo.add(&source(b"pending")).unwrap();
        assert!(!repo.object_path(&reference).exists());
        repo.persist().unwrap();
        assert!(repo.object_path(&reference).exists());
    }

    #[test]
    fn digest_verified_on_read() {
        let (_dir, mut repo) = temp_repo();
        let reference = repo.add(&source(b"tamper me")).unwrap();
        repo.persist().unwrap();

        // Overwrite the object file with other compressed bytes.
        let other = zstd::encode_all(&b"something else"[..], 3).unwrap();
        fs::write(repo.object_path(&reference), other).unwrap();

        let err = repo.load(&reference).unwrap_err();
        assert!(matches!(err, StoreError::CorruptObject { .. }));
    }

    #[test]
    fn component_add_updates_index() {
        let (_dir, mut repo) = temp_repo();
        let component = Component::from_id(&"ui/button".parse().unwrap());
        let reference = repo.add(&ScopeObject::Component(component)).unwrap();

        let entry = repo.index().get("ui/button").unwrap();
        assert_eq!(entry.reference, reference);
        assert_eq!(entry.kind, IndexKind::Component);
    }

    #[test]
    fn load_by_id_resolves_catalog_head() {
        let (_dir, mut repo) = temp_repo();
        let component = Component::from_id(&"ui/button".parse().unwrap());
        repo.add(&ScopeObject::Component(component.clone())).unwrap();
        repo.persist().unwrap();

        let loaded = repo.load_by_id(&"ui/button".parse().unwrap()).unwrap().unwrap();
        assert_eq!(loaded.as_component().unwrap(), &component);
        assert!(repo.load_by_id(&"ui/missing".parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut repo = Repository::open(dir.path()).unwrap();
            let component = Component::from_id(&"ui/button".parse().unwrap());
            repo.add(&ScopeObject::Component(component)).unwrap();
            repo.persist().unwrap();
        }
        let repo = Repository::open(dir.path()).unwrap();
        assert!(repo.index().get("ui/button").is_some());
    }

    #[test]
    fn replacing_catalog_head_repoints_index() {
        let (_dir, mut repo) = temp_repo();
        let mut component = Component::from_id(&"ui/button".parse().unwrap());
        let old_ref = repo.add(&ScopeObject::Component(component.clone())).unwrap();

        component.deprecated = true;
        let new_ref = repo.add(&ScopeObject::Component(component)).unwrap();
        // Stage removal of the superseded head after the new one.
        repo.remove(&old_ref);

        let entry = repo.index().get("ui/button").unwrap();
        assert_eq!(entry.reference, new_ref);
    }

    #[test]
    fn symlink_indexed_under_local_id() {
        let (_dir, mut repo) = temp_repo();
        let link = Symlink {
            namespace: "ui".into(),
            name: "button".into(),
            real_scope: "remote1".into(),
        };
        repo.add(&ScopeObject::Symlink(link)).unwrap();
        assert_eq!(repo.index().get("ui/button").unwrap().kind, IndexKind::Symlink);
    }

    #[test]
    fn list_refs_scans_directory() {
        let (_dir, mut repo) = temp_repo();
        let r1 = repo.add(&source(b"one")).unwrap();
        let r2 = repo.add(&source(b"two")).unwrap();
        repo.persist().unwrap();

        let refs = repo.list_refs().unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&r1));
        assert!(refs.contains(&r2));
    }

    #[test]
    fn list_components_filters_symlinks() {
        let (_dir, mut repo) = temp_repo();
        repo.add(&ScopeObject::Component(Component::from_id(
            &"ui/button".parse().unwrap(),
        )))
        .unwrap();
        repo.add(&ScopeObject::Symlink(Symlink {
            namespace: "ui".into(),
            name: "icon".into(),
            real_scope: "remote1".into(),
        }))
        .unwrap();
        repo.add(&source(b"blob")).unwrap();
        repo.persist().unwrap();

        assert_eq!(repo.list_components(true).unwrap().len(), 2);
        assert_eq!(repo.list_components(false).unwrap().len(), 1);
    }

    #[test]
    fn load_raw_returns_tag_without_decode() {
        let (_dir, mut repo) = temp_repo();
        let reference = repo.add(&source(b"raw me")).unwrap();
        repo.persist().unwrap();

        let raw = repo.load_raw(&reference).unwrap();
        assert_eq!(raw.tag, "source");
        assert_eq!(raw.reference, reference);
    }

    #[test]
    fn add_raw_roundtrips_and_indexes_catalogs() {
        let (_dir, mut repo) = temp_repo();
        let component = ScopeObject::Component(Component::from_id(&"ui/button".parse().unwrap()));
        let encoded = component.encode().unwrap();
        let reference = repo.add_raw(encoded).unwrap();
        assert_eq!(reference, component.hash().unwrap());
        assert!(repo.index().get("ui/button").is_some());
    }

    #[test]
    fn discard_staged_restores_persisted_state() {
        let (_dir, mut repo) = temp_repo();
        let kept = repo.add(&source(b"kept")).unwrap();
        repo.persist().unwrap();

        let abandoned = repo.add(&source(b"abandoned")).unwrap();
        repo.remove(&kept);
        repo.discard_staged().unwrap();

        assert!(repo.has(&kept));
        assert!(!repo.has(&abandoned));
    }

    #[test]
    fn persist_is_a_noop_with_nothing_staged() {
        let (_dir, mut repo) = temp_repo();
        repo.persist().unwrap();
        assert!(repo.list_refs().unwrap().is_empty());
    }
}
