use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::Version as Semver;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdError;

/// Namespace assigned to ids written without one.
pub const DEFAULT_NAMESPACE: &str = "global";

/// Identifier of a logical component: `(scope?, namespace, name)` plus an
/// optional version.
///
/// The `scope` is `None` for locally-created components that have never been
/// exported. The textual form is `[scope/]namespace/name[@version]`; a bare
/// `name` gets the [`DEFAULT_NAMESPACE`]. Parsing and formatting round-trip.
///
/// Equality and hashing ignore the version: two ids naming the same logical
/// component compare equal. Use [`ComponentId::full_eq`] when the version
/// matters. Resolution never mutates an id in place; version filling goes
/// through [`ComponentId::with_version`], which returns a new value.
#[derive(Clone, Debug, Eq)]
pub struct ComponentId {
    pub scope: Option<String>,
    pub namespace: String,
    pub name: String,
    pub version: Option<Semver>,
}

impl ComponentId {
    /// Create an unscoped, unversioned id.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: None,
            namespace: namespace.into(),
            name: name.into(),
            version: None,
        }
    }

    /// Create a scoped, unversioned id.
    pub fn scoped(
        scope: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scope: Some(scope.into()),
            namespace: namespace.into(),
            name: name.into(),
            version: None,
        }
    }

    /// A copy of this id carrying the given version.
    pub fn with_version(&self, version: Semver) -> Self {
        Self {
            version: Some(version),
            ..self.clone()
        }
    }

    /// A copy of this id with the version stripped.
    pub fn without_version(&self) -> Self {
        Self {
            version: None,
            ..self.clone()
        }
    }

    /// A copy of this id rewritten to the given scope.
    pub fn with_scope(&self, scope: impl Into<String>) -> Self {
        Self {
            scope: Some(scope.into()),
            ..self.clone()
        }
    }

    /// True when the component belongs to the named scope or has never been
    /// exported (no scope at all).
    pub fn is_local(&self, scope_name: &str) -> bool {
        match &self.scope {
            None => true,
            Some(s) => s == scope_name,
        }
    }

    /// Compare including the version.
    pub fn full_eq(&self, other: &Self) -> bool {
        self == other && self.version == other.version
    }

    /// Canonical string without the version suffix. Used as the key of the
    /// component index and of batch memo tables.
    pub fn to_string_without_version(&self) -> String {
        let mut out = String::new();
        match &self.scope {
            Some(scope) => {
                out.push_str(scope);
                out.push('/');
                out.push_str(&self.namespace);
                out.push('/');
                out.push_str(&self.name);
            }
            None => {
                if self.namespace != DEFAULT_NAMESPACE {
                    out.push_str(&self.namespace);
                    out.push('/');
                }
                out.push_str(&self.name);
            }
        }
        out
    }

    /// Canonical string including the version suffix when present. Used to
    /// deduplicate flattened dependency sets by id-with-version.
    pub fn to_string_with_version(&self) -> String {
        match &self.version {
            Some(v) => format!("{}@{}", self.to_string_without_version(), v),
            None => self.to_string_without_version(),
        }
    }
}

impl PartialEq for ComponentId {
    fn eq(&self, other: &Self) -> bool {
        self.scope == other.scope && self.namespace == other.namespace && self.name == other.name
    }
}

impl Hash for ComponentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scope.hash(state);
        self.namespace.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_version())
    }
}

impl FromStr for ComponentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdError::InvalidId("empty id".into()));
        }

        let (path, version) = match s.split_once('@') {
            Some((path, v)) => {
                let version =
                    Semver::parse(v).map_err(|e| IdError::InvalidVersion(e.to_string()))?;
                (path, Some(version))
            }
            None => (s, None),
        };

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(IdError::InvalidId(s.to_string()));
        }

        let (scope, namespace, name) = match segments.as_slice() {
            [name] => (None, DEFAULT_NAMESPACE.to_string(), name.to_string()),
            [namespace, name] => (None, namespace.to_string(), name.to_string()),
            [scope, namespace, name] => {
                (Some(scope.to_string()), namespace.to_string(), name.to_string())
            }
            _ => return Err(IdError::InvalidId(s.to_string())),
        };

        Ok(Self {
            scope,
            namespace,
            name,
            version,
        })
    }
}

impl Serialize for ComponentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_with_version())
    }
}

impl<'de> Deserialize<'de> for ComponentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Semver {
        Semver::parse(s).unwrap()
    }

    #[test]
    fn parse_bare_name() {
        let id: ComponentId = "button".parse().unwrap();
        assert_eq!(id.scope, None);
        assert_eq!(id.namespace, DEFAULT_NAMESPACE);
        assert_eq!(id.name, "button");
        assert_eq!(id.version, None);
    }

    #[test]
    fn parse_namespace_and_name() {
        let id: ComponentId = "ui/button".parse().unwrap();
        assert_eq!(id.scope, None);
        assert_eq!(id.namespace, "ui");
        assert_eq!(id.name, "button");
    }

    #[test]
    fn parse_full_id_with_version() {
        let id: ComponentId = "remote1/ui/button@0.0.1".parse().unwrap();
        assert_eq!(id.scope.as_deref(), Some("remote1"));
        assert_eq!(id.namespace, "ui");
        assert_eq!(id.name, "button");
        assert_eq!(id.version, Some(v("0.0.1")));
    }

    #[test]
    fn parse_rejects_empty_segments() {
        assert!("ui//button".parse::<ComponentId>().is_err());
        assert!("".parse::<ComponentId>().is_err());
        assert!("a/b/c/d".parse::<ComponentId>().is_err());
    }

    #[test]
    fn parse_rejects_bad_version() {
        assert!("ui/button@not-a-version".parse::<ComponentId>().is_err());
    }

    #[test]
    fn format_roundtrip() {
        for s in ["button", "ui/button", "remote1/ui/button", "remote1/ui/button@1.2.3"] {
            let id: ComponentId = s.parse().unwrap();
            assert_eq!(id.to_string(), s);
        }
    }

    #[test]
    fn equality_ignores_version() {
        let a: ComponentId = "ui/button@0.0.1".parse().unwrap();
        let b: ComponentId = "ui/button@0.0.2".parse().unwrap();
        assert_eq!(a, b);
        assert!(!a.full_eq(&b));
        assert!(a.full_eq(&a.clone()));
    }

    #[test]
    fn equality_respects_scope() {
        let a: ComponentId = "ui/button".parse().unwrap();
        let b: ComponentId = "remote1/ui/button".parse().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn with_version_returns_new_value() {
        let a: ComponentId = "ui/button".parse().unwrap();
        let b = a.with_version(v("1.0.0"));
        assert_eq!(a.version, None);
        assert_eq!(b.version, Some(v("1.0.0")));
    }

    #[test]
    fn is_local_for_unscoped_and_own_scope() {
        let unscoped: ComponentId = "ui/button".parse().unwrap();
        let own: ComponentId = "mine/ui/button".parse().unwrap();
        let foreign: ComponentId = "theirs/ui/button".parse().unwrap();
        assert!(unscoped.is_local("mine"));
        assert!(own.is_local("mine"));
        assert!(!foreign.is_local("mine"));
    }

    #[test]
    fn default_namespace_omitted_in_unscoped_form() {
        let id = ComponentId::new(DEFAULT_NAMESPACE, "button");
        assert_eq!(id.to_string(), "button");
        let scoped = id.with_scope("remote1");
        assert_eq!(scoped.to_string(), "remote1/global/button");
    }

    #[test]
    fn serde_roundtrip_as_string() {
        let id: ComponentId = "remote1/ui/button@0.1.0".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"remote1/ui/button@0.1.0\"");
        let parsed: ComponentId = serde_json::from_str(&json).unwrap();
        assert!(id.full_eq(&parsed));
    }
}
