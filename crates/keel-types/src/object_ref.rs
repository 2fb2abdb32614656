use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdError;

/// Content-addressed identifier for any stored object.
///
/// An `ObjectRef` is the BLAKE3 hash of an object's canonical encoding.
/// Identical content always produces the same ref, making objects
/// deduplicatable and verifiable. All references between stored objects
/// are `ObjectRef`s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef([u8; 32]);

impl ObjectRef {
    /// Compute an `ObjectRef` from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create an `ObjectRef` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string (64 hex characters).
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = hex::decode(s).map_err(|e| IdError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(IdError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self.short_hex())
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Serialized as a hex string so refs stay readable inside JSON payloads.
impl Serialize for ObjectRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ObjectRef::from_bytes(data), ObjectRef::from_bytes(data));
    }

    #[test]
    fn different_data_produces_different_refs() {
        assert_ne!(ObjectRef::from_bytes(b"hello"), ObjectRef::from_bytes(b"world"));
    }

    #[test]
    fn hex_roundtrip() {
        let r = ObjectRef::from_bytes(b"test");
        let parsed = ObjectRef::from_hex(&r.to_hex()).unwrap();
        assert_eq!(r, parsed);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let err = ObjectRef::from_hex("abcd").unwrap_err();
        assert!(matches!(err, IdError::InvalidLength { expected: 32, actual: 2 }));
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let err = ObjectRef::from_hex("zz").unwrap_err();
        assert!(matches!(err, IdError::InvalidHex(_)));
    }

    #[test]
    fn short_hex_is_8_chars() {
        assert_eq!(ObjectRef::from_bytes(b"test").short_hex().len(), 8);
    }

    #[test]
    fn display_is_full_hex() {
        let r = ObjectRef::from_bytes(b"test");
        assert_eq!(format!("{r}").len(), 64);
    }

    #[test]
    fn serde_roundtrip_as_string() {
        let r = ObjectRef::from_bytes(b"serde test");
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.starts_with('"'));
        let parsed: ObjectRef = serde_json::from_str(&json).unwrap();
        assert_eq!(r, parsed);
    }

    #[test]
    fn ordering_is_consistent() {
        let r1 = ObjectRef::from_hash([0; 32]);
        let r2 = ObjectRef::from_hash([1; 32]);
        assert!(r1 < r2);
    }
}
