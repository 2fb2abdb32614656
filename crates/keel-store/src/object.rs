use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use semver::Version as Semver;
use serde::{Deserialize, Serialize};

use keel_types::{ComponentId, ObjectRef};

use crate::error::{StoreError, StoreResult};

/// The kind of object stored, recorded as a short ASCII tag at the head of
/// every encoded object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Catalog of all versions for one logical component.
    Component,
    /// Immutable snapshot of one release.
    Version,
    /// Raw file content.
    Source,
    /// Redirect from a locally-created id to the scope it was exported to.
    Symlink,
}

impl ObjectKind {
    /// The ASCII tag written at the head of the encoding.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Component => "component",
            Self::Version => "version",
            Self::Source => "source",
            Self::Symlink => "symlink",
        }
    }

    /// Parse a tag back into a kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "component" => Some(Self::Component),
            "version" => Some(Self::Version),
            "source" => Some(Self::Source),
            "symlink" => Some(Self::Symlink),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Frame a payload with its type tag: `{tag} {len}\0{payload}`.
///
/// The digest of an object is BLAKE3 over these framed, uncompressed bytes,
/// so identity never depends on the compression applied afterwards.
pub fn frame(tag: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!("{tag} {}\0", payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split framed bytes into `(tag, payload)`, validating the declared length.
pub fn split_frame(bytes: &[u8]) -> StoreResult<(&str, &[u8])> {
    let corrupt = |reason: &str| StoreError::CorruptObject {
        id: ObjectRef::from_bytes(bytes),
        reason: reason.to_string(),
    };

    let nul = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| corrupt("missing header terminator"))?;
    let header =
        std::str::from_utf8(&bytes[..nul]).map_err(|_| corrupt("non-ascii header"))?;
    let (tag, len) = header
        .split_once(' ')
        .ok_or_else(|| corrupt("malformed header"))?;
    let len: usize = len.parse().map_err(|_| corrupt("malformed length"))?;

    let payload = &bytes[nul + 1..];
    if payload.len() != len {
        return Err(corrupt("length mismatch"));
    }
    Ok((tag, payload))
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// Catalog of all versions of one logical component.
///
/// The one mutable record in the model: its value changes over time, but each
/// new value is a fresh object with a fresh ref, and the component index is
/// repointed atomically at persist time. The `versions` map is key-sorted so
/// the encoding is canonical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub scope: Option<String>,
    pub namespace: String,
    pub name: String,
    pub versions: BTreeMap<Semver, ObjectRef>,
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_prefix: Option<String>,
}

impl Component {
    /// An empty catalog for the given id. The id's version is ignored.
    pub fn from_id(id: &ComponentId) -> Self {
        Self {
            scope: id.scope.clone(),
            namespace: id.namespace.clone(),
            name: id.name.clone(),
            versions: BTreeMap::new(),
            deprecated: false,
            lang: None,
            binding_prefix: None,
        }
    }

    /// The id of this component, without a version.
    pub fn to_id(&self) -> ComponentId {
        ComponentId {
            scope: self.scope.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            version: None,
        }
    }

    /// The greatest released version, if any.
    pub fn latest(&self) -> Option<&Semver> {
        self.versions.keys().next_back()
    }

    /// The ref of a specific version.
    pub fn version_ref(&self, version: &Semver) -> Option<ObjectRef> {
        self.versions.get(version).copied()
    }

    pub fn has_version(&self, version: &Semver) -> bool {
        self.versions.contains_key(version)
    }

    /// Record a new version. The map is monotonically extended; replacing an
    /// existing entry is the caller's responsibility to rule out.
    pub fn add_version(&mut self, version: Semver, reference: ObjectRef) {
        self.versions.insert(version, reference);
    }

    /// Drop a version entry, returning the ref it pointed at.
    pub fn remove_version(&mut self, version: &Semver) -> Option<ObjectRef> {
        self.versions.remove(version)
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A file belonging to a version, referencing its content by [`ObjectRef`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub relative_path: String,
    pub file: ObjectRef,
}

/// A direct dependency of a version. The id is fully qualified with a
/// version once the release is persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: ComponentId,
    pub relative_path: String,
}

/// Release log attached to a version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Outcome of one spec within a spec run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub title: String,
    pub pass: bool,
}

/// Result of running a component's specs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecsResults {
    pub pass: bool,
    #[serde(default)]
    pub tests: Vec<TestResult>,
}

/// Immutable snapshot of one release of a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub main_file: String,
    pub files: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dists: Option<Vec<FileEntry>>,
    pub dependencies: Vec<Dependency>,
    /// Deduplicated transitive closure of `dependencies`, by id-with-version.
    pub flattened_dependencies: Vec<ComponentId>,
    pub package_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<ComponentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tester: Option<ComponentId>,
    pub log: LogEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specs_results: Option<SpecsResults>,
}

impl Version {
    /// Refs of every source blob this version references (files and dists).
    pub fn source_refs(&self) -> Vec<ObjectRef> {
        let mut refs: Vec<ObjectRef> = self.files.iter().map(|f| f.file).collect();
        if let Some(dists) = &self.dists {
            refs.extend(dists.iter().map(|f| f.file));
        }
        refs
    }

    /// Ids of the direct dependencies.
    pub fn dependency_ids(&self) -> Vec<ComponentId> {
        self.dependencies.iter().map(|d| d.id.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Raw file-content blob. Stored verbatim, no JSON envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub content: Vec<u8>,
}

impl Source {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Symlink
// ---------------------------------------------------------------------------

/// Redirection record: a locally-created id has been exported to
/// `real_scope`. Local dependents keep resolving through it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symlink {
    pub namespace: String,
    pub name: String,
    pub real_scope: String,
}

impl Symlink {
    /// The local (scope-less) id this symlink is stored under.
    pub fn to_id(&self) -> ComponentId {
        ComponentId::new(self.namespace.clone(), self.name.clone())
    }

    /// The id the symlink redirects to.
    pub fn redirect(&self) -> ComponentId {
        ComponentId::scoped(
            self.real_scope.clone(),
            self.namespace.clone(),
            self.name.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tagged union + registry
// ---------------------------------------------------------------------------

/// Any object the store can hold. Decoding reads the type tag and dispatches
/// to the matching constructor; unknown tags are rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScopeObject {
    Component(Component),
    Version(Version),
    Source(Source),
    Symlink(Symlink),
}

impl ScopeObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Component(_) => ObjectKind::Component,
            Self::Version(_) => ObjectKind::Version,
            Self::Source(_) => ObjectKind::Source,
            Self::Symlink(_) => ObjectKind::Symlink,
        }
    }

    /// Canonical encoding: tag header plus a key-sorted payload. Stable
    /// across runs for equal values.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let payload = match self {
            Self::Component(c) => {
                serde_json::to_vec(c).map_err(|e| StoreError::Serialization(e.to_string()))?
            }
            Self::Version(v) => {
                serde_json::to_vec(v).map_err(|e| StoreError::Serialization(e.to_string()))?
            }
            Self::Source(s) => s.content.clone(),
            Self::Symlink(s) => {
                serde_json::to_vec(s).map_err(|e| StoreError::Serialization(e.to_string()))?
            }
        };
        Ok(frame(self.kind().tag(), &payload))
    }

    /// Digest of the canonical encoding. This is the object's identity.
    pub fn hash(&self) -> StoreResult<ObjectRef> {
        Ok(ObjectRef::from_bytes(&self.encode()?))
    }

    /// Decode framed bytes back into a typed object.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        let reference = ObjectRef::from_bytes(bytes);
        let (tag, payload) = split_frame(bytes)?;
        let corrupt = |e: serde_json::Error| StoreError::CorruptObject {
            id: reference,
            reason: e.to_string(),
        };

        match ObjectKind::from_tag(tag) {
            Some(ObjectKind::Component) => {
                Ok(Self::Component(serde_json::from_slice(payload).map_err(corrupt)?))
            }
            Some(ObjectKind::Version) => {
                Ok(Self::Version(serde_json::from_slice(payload).map_err(corrupt)?))
            }
            Some(ObjectKind::Source) => Ok(Self::Source(Source {
                content: payload.to_vec(),
            })),
            Some(ObjectKind::Symlink) => {
                Ok(Self::Symlink(serde_json::from_slice(payload).map_err(corrupt)?))
            }
            None => Err(StoreError::UnknownObjectType(tag.to_string())),
        }
    }

    pub fn as_component(&self) -> Option<&Component> {
        match self {
            Self::Component(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_version(&self) -> Option<&Version> {
        match self {
            Self::Version(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_source(&self) -> Option<&Source> {
        match self {
            Self::Source(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<&Symlink> {
        match self {
            Self::Symlink(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn v(s: &str) -> Semver {
        Semver::parse(s).unwrap()
    }

    fn log() -> LogEntry {
        LogEntry {
            message: "initial release".into(),
            date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            author: Some("dev".into()),
        }
    }

    fn sample_version() -> Version {
        Version {
            main_file: "index.js".into(),
            files: vec![FileEntry {
                name: "index.js".into(),
                relative_path: "index.js".into(),
                file: ObjectRef::from_bytes(b"content"),
            }],
            dists: None,
            dependencies: vec![Dependency {
                id: "ui/icon@0.0.1".parse().unwrap(),
                relative_path: "ui/icon".into(),
            }],
            flattened_dependencies: vec!["ui/icon@0.0.1".parse().unwrap()],
            package_dependencies: BTreeMap::from([("left-pad".into(), "^1.0.0".into())]),
            compiler: None,
            tester: None,
            log: log(),
            specs_results: None,
        }
    }

    #[test]
    fn frame_and_split_roundtrip() {
        let framed = frame("source", b"hello");
        let (tag, payload) = split_frame(&framed).unwrap();
        assert_eq!(tag, "source");
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn split_rejects_length_mismatch() {
        let mut framed = frame("source", b"hello");
        framed.push(b'!');
        let err = split_frame(&framed).unwrap_err();
        assert!(matches!(err, StoreError::CorruptObject { .. }));
    }

    #[test]
    fn split_rejects_missing_terminator() {
        let err = split_frame(b"component 12").unwrap_err();
        assert!(matches!(err, StoreError::CorruptObject { .. }));
    }

    #[test]
    fn source_encodes_verbatim() {
        let obj = ScopeObject::Source(Source::new(b"hello".to_vec()));
        let encoded = obj.encode().unwrap();
        assert_eq!(&encoded, b"source 5\0hello");
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let bytes = frame("widget", b"{}");
        let err = ScopeObject::decode(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::UnknownObjectType(tag) if tag == "widget"));
    }

    #[test]
    fn decode_rejects_corrupt_payload() {
        let bytes = frame("component", b"not json");
        let err = ScopeObject::decode(&bytes).unwrap_err();
        assert!(matches!(err, StoreError::CorruptObject { .. }));
    }

    #[test]
    fn component_roundtrip_preserves_ref() {
        let mut component = Component::from_id(&"ui/button".parse().unwrap());
        component.add_version(v("0.0.1"), ObjectRef::from_bytes(b"v1"));
        component.add_version(v("0.1.0"), ObjectRef::from_bytes(b"v2"));
        let obj = ScopeObject::Component(component);
        let encoded = obj.encode().unwrap();
        let decoded = ScopeObject::decode(&encoded).unwrap();
        assert_eq!(obj, decoded);
        assert_eq!(obj.hash().unwrap(), decoded.hash().unwrap());
    }

    #[test]
    fn version_roundtrip_preserves_ref() {
        let obj = ScopeObject::Version(sample_version());
        let decoded = ScopeObject::decode(&obj.encode().unwrap()).unwrap();
        assert_eq!(obj.hash().unwrap(), decoded.hash().unwrap());
        assert_eq!(obj, decoded);
    }

    #[test]
    fn symlink_roundtrip_preserves_ref() {
        let obj = ScopeObject::Symlink(Symlink {
            namespace: "ui".into(),
            name: "button".into(),
            real_scope: "remote1".into(),
        });
        let decoded = ScopeObject::decode(&obj.encode().unwrap()).unwrap();
        assert_eq!(obj.hash().unwrap(), decoded.hash().unwrap());
    }

    #[test]
    fn encoding_is_stable_across_insertion_order() {
        let mut a = Component::from_id(&"ui/button".parse().unwrap());
        a.add_version(v("0.0.1"), ObjectRef::from_bytes(b"v1"));
        a.add_version(v("0.1.0"), ObjectRef::from_bytes(b"v2"));

        let mut b = Component::from_id(&"ui/button".parse().unwrap());
        b.add_version(v("0.1.0"), ObjectRef::from_bytes(b"v2"));
        b.add_version(v("0.0.1"), ObjectRef::from_bytes(b"v1"));

        assert_eq!(
            ScopeObject::Component(a).encode().unwrap(),
            ScopeObject::Component(b).encode().unwrap()
        );
    }

    #[test]
    fn latest_is_greatest_semver() {
        let mut component = Component::from_id(&"ui/button".parse().unwrap());
        component.add_version(v("0.0.9"), ObjectRef::from_bytes(b"a"));
        component.add_version(v("0.0.10"), ObjectRef::from_bytes(b"b"));
        assert_eq!(component.latest(), Some(&v("0.0.10")));
    }

    #[test]
    fn remove_version_returns_ref() {
        let mut component = Component::from_id(&"ui/button".parse().unwrap());
        let r = ObjectRef::from_bytes(b"a");
        component.add_version(v("0.0.1"), r);
        assert_eq!(component.remove_version(&v("0.0.1")), Some(r));
        assert!(component.versions.is_empty());
    }

    #[test]
    fn symlink_redirect_carries_real_scope() {
        let link = Symlink {
            namespace: "ui".into(),
            name: "button".into(),
            real_scope: "remote1".into(),
        };
        assert_eq!(link.to_id().to_string(), "ui/button");
        assert_eq!(link.redirect().to_string(), "remote1/ui/button");
    }

    #[test]
    fn version_source_refs_include_dists() {
        let mut version = sample_version();
        version.dists = Some(vec![FileEntry {
            name: "index.js".into(),
            relative_path: "dist/index.js".into(),
            file: ObjectRef::from_bytes(b"dist"),
        }]);
        assert_eq!(version.source_refs().len(), 2);
    }
}
