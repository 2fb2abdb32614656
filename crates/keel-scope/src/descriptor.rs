//! Scope metadata (`scope.json`) and scope-root detection.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use semver::Version as Semver;
use serde::{Deserialize, Serialize};

use crate::error::{ScopeError, ScopeResult};

/// Metadata file name at the scope root.
pub const SCOPE_JSON: &str = "scope.json";
/// Hidden scope directory name inside a working directory.
pub const HIDDEN_SCOPE_DIR: &str = ".keel";

/// The engine version this binary writes and understands.
pub fn engine_version() -> Semver {
    env!("CARGO_PKG_VERSION")
        .parse()
        .expect("crate version is valid semver")
}

/// Contents of `scope.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// On-disk format version; compared against [`engine_version`] by the
    /// migration runner.
    pub version: Semver,
    /// Scope-local remotes, name to URL.
    #[serde(default)]
    pub remotes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver_path: Option<String>,
}

impl ScopeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_name: None,
            version: engine_version(),
            remotes: BTreeMap::new(),
            resolver_path: None,
        }
    }

    /// Read the descriptor from a scope root.
    pub fn load(scope_root: &Path) -> ScopeResult<Self> {
        let bytes = fs::read(scope_root.join(SCOPE_JSON))?;
        serde_json::from_slice(&bytes).map_err(|e| ScopeError::Serialization(e.to_string()))
    }

    /// Write the descriptor atomically (temp file + rename).
    pub fn write(&self, scope_root: &Path) -> ScopeResult<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| ScopeError::Serialization(e.to_string()))?;
        let target = scope_root.join(SCOPE_JSON);
        let tmp = scope_root.join(format!("{SCOPE_JSON}.tmp"));
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(tmp, target)?;
        Ok(())
    }
}

/// Walk ancestors of `start` looking for a scope root: either a directory
/// holding a `.keel` subdirectory, or a bare root holding `objects/` plus
/// `scope.json`. The first match wins.
pub fn locate(start: &Path) -> ScopeResult<PathBuf> {
    for dir in start.ancestors() {
        let hidden = dir.join(HIDDEN_SCOPE_DIR);
        if hidden.is_dir() {
            return Ok(hidden);
        }
        if dir.join(SCOPE_JSON).is_file() && dir.join("objects").is_dir() {
            return Ok(dir.to_path_buf());
        }
    }
    Err(ScopeError::ScopeNotFound(start.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut descriptor = ScopeDescriptor::new("my-scope");
        descriptor
            .remotes
            .insert("remote1".into(), "ssh://host/scope".into());
        descriptor.write(dir.path()).unwrap();

        let loaded = ScopeDescriptor::load(dir.path()).unwrap();
        assert_eq!(loaded, descriptor);
    }

    #[test]
    fn descriptor_version_defaults_to_engine_version() {
        let descriptor = ScopeDescriptor::new("s");
        assert_eq!(descriptor.version, engine_version());
    }

    #[test]
    fn locate_finds_bare_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("objects")).unwrap();
        ScopeDescriptor::new("bare").write(dir.path()).unwrap();

        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(locate(&nested).unwrap(), dir.path());
    }

    #[test]
    fn locate_prefers_hidden_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(HIDDEN_SCOPE_DIR)).unwrap();
        assert_eq!(locate(dir.path()).unwrap(), dir.path().join(HIDDEN_SCOPE_DIR));
    }

    #[test]
    fn locate_fails_outside_any_scope() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            locate(dir.path()).unwrap_err(),
            ScopeError::ScopeNotFound(_)
        ));
    }
}
