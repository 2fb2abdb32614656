//! Transfer bundles: the wire form of a component and its object closure.
//!
//! A bundle carries one encoded `Component` plus the encoded `Version` and
//! `Source` objects it references. On the wire each entry is
//! zstd-compressed and varint-framed, and the whole bundle ends with a
//! BLAKE3 checksum.

use keel_types::{ComponentId, ObjectRef};

use crate::error::{StoreError, StoreResult};
use crate::object::ScopeObject;

const MAGIC: &[u8; 4] = b"KEEL";
const FORMAT_VERSION: u32 = 1;
const COMPRESSION_LEVEL: i32 = 3;

/// A component plus its referenced objects, as framed (uncompressed) bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentBundle {
    /// Encoded `Component` object.
    pub component: Vec<u8>,
    /// Encoded `Version` and `Source` objects.
    pub objects: Vec<Vec<u8>>,
}

impl ComponentBundle {
    pub fn new(component: Vec<u8>, objects: Vec<Vec<u8>>) -> Self {
        Self { component, objects }
    }

    /// Decode the carried component.
    pub fn component(&self) -> StoreResult<ScopeObject> {
        ScopeObject::decode(&self.component)
    }

    /// The id of the carried component, without a version.
    pub fn component_id(&self) -> StoreResult<ComponentId> {
        match self.component()? {
            ScopeObject::Component(c) => Ok(c.to_id()),
            other => Err(StoreError::BadBundle(format!(
                "bundle head is a {}, expected a component",
                other.kind()
            ))),
        }
    }

    /// Decode every non-component object in the bundle.
    pub fn decode_objects(&self) -> StoreResult<Vec<ScopeObject>> {
        self.objects.iter().map(|bytes| ScopeObject::decode(bytes)).collect()
    }

    /// Refs of every object in the bundle, component first.
    pub fn refs(&self) -> Vec<ObjectRef> {
        std::iter::once(&self.component)
            .chain(self.objects.iter())
            .map(|bytes| ObjectRef::from_bytes(bytes))
            .collect()
    }

    /// Serialize for transport: magic, format version, entry count, then
    /// each entry varint-framed and compressed, then a BLAKE3 trailer.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        out.extend_from_slice(&(1 + self.objects.len() as u32).to_be_bytes());

        for entry in std::iter::once(&self.component).chain(self.objects.iter()) {
            let compressed = zstd::encode_all(entry.as_slice(), COMPRESSION_LEVEL)
                .map_err(|e| StoreError::BadBundle(format!("compression failed: {e}")))?;
            encode_varint(&mut out, entry.len() as u64);
            encode_varint(&mut out, compressed.len() as u64);
            out.extend_from_slice(&compressed);
        }

        let checksum = *blake3::hash(&out).as_bytes();
        out.extend_from_slice(&checksum);
        Ok(out)
    }

    /// Parse transport bytes, verifying magic, format version and checksum.
    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        if data.len() < MAGIC.len() + 8 + 32 {
            return Err(StoreError::BadBundle("truncated bundle".into()));
        }
        let (body, trailer) = data.split_at(data.len() - 32);
        let checksum = *blake3::hash(body).as_bytes();
        if checksum.as_slice() != trailer {
            return Err(StoreError::BadBundle("checksum mismatch".into()));
        }
        if &body[..4] != MAGIC {
            return Err(StoreError::BadBundle("bad magic".into()));
        }
        let version = u32::from_be_bytes(
            body[4..8]
                .try_into()
                .map_err(|_| StoreError::BadBundle("truncated header".into()))?,
        );
        if version != FORMAT_VERSION {
            return Err(StoreError::BadBundle(format!(
                "unsupported bundle format version {version}"
            )));
        }
        let count = u32::from_be_bytes(
            body[8..12]
                .try_into()
                .map_err(|_| StoreError::BadBundle("truncated header".into()))?,
        ) as usize;
        if count == 0 {
            return Err(StoreError::BadBundle("empty bundle".into()));
        }

        let mut offset = 12;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let (uncompressed_len, consumed) = decode_varint(&body[offset..])?;
            offset += consumed;
            let (compressed_len, consumed) = decode_varint(&body[offset..])?;
            offset += consumed;
            let end = offset + compressed_len as usize;
            if end > body.len() {
                return Err(StoreError::BadBundle("truncated entry".into()));
            }
            let entry = zstd::decode_all(&body[offset..end])
                .map_err(|e| StoreError::BadBundle(format!("decompression failed: {e}")))?;
            if entry.len() as u64 != uncompressed_len {
                return Err(StoreError::BadBundle("entry length mismatch".into()));
            }
            entries.push(entry);
            offset = end;
        }

        let mut entries = entries.into_iter();
        let component = entries.next().expect("count checked above");
        Ok(Self {
            component,
            objects: entries.collect(),
        })
    }
}

/// Encode a u64 as a variable-length integer.
fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes consumed).
fn decode_varint(data: &[u8]) -> StoreResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(StoreError::BadBundle("varint overflow".into()));
        }
    }
    Err(StoreError::BadBundle("truncated varint".into()))
}
