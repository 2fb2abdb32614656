//! On-disk format migration.
//!
//! A migration manifest is an ordered list of [`Migration`]s, each keyed by
//! the engine version that introduced it and carrying per-type transforms
//! over raw objects. The runner applies every migration newer than the
//! recorded scope version, repoints catalogs whose version objects changed
//! ref, persists, and only then records the new scope version. A failure
//! anywhere leaves the scope unchanged.

use std::collections::BTreeMap;

use semver::Version as Semver;
use serde_json::Value;
use tracing::{debug, info};

use keel_store::{frame, split_frame, ObjectKind, RawObject, ScopeObject};
use keel_types::ObjectRef;

use crate::descriptor::engine_version;
use crate::error::{ScopeError, ScopeResult};
use crate::scope::Scope;

/// Transform over one raw object's framed bytes. Returns the replacement
/// bytes, or `None` when the object is already in the target shape.
pub type TransformFn = Box<dyn Fn(&RawObject) -> ScopeResult<Option<Vec<u8>>> + Send + Sync>;

/// One per-type transformation within a migration.
pub struct ObjectTransform {
    pub kind: ObjectKind,
    pub transform: TransformFn,
}

/// All transformations introduced by one engine version.
pub struct Migration {
    pub version: Semver,
    pub transforms: Vec<ObjectTransform>,
}

/// Outcome of a migration run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationResult {
    /// False when the recorded scope version was already current.
    pub run: bool,
    pub success: bool,
    /// Objects replaced by a new ref.
    pub migrated: usize,
}

/// Patch a JSON payload in place; returns the re-framed bytes when the
/// patch changed anything.
fn patch_json(
    raw: &RawObject,
    patch: impl Fn(&mut serde_json::Map<String, Value>) -> bool,
) -> ScopeResult<Option<Vec<u8>>> {
    let (tag, payload) = split_frame(&raw.bytes)?;
    let mut value: Value = serde_json::from_slice(payload)
        .map_err(|e| ScopeError::Serialization(e.to_string()))?;
    let Some(map) = value.as_object_mut() else {
        return Ok(None);
    };
    if !patch(map) {
        return Ok(None);
    }
    let payload =
        serde_json::to_vec(&value).map_err(|e| ScopeError::Serialization(e.to_string()))?;
    Ok(Some(frame(tag, &payload)))
}

/// The manifest this engine ships.
///
/// 0.11.0 made `deprecated` and `package_dependencies` mandatory fields;
/// catalogs and versions written by older engines lack them.
pub fn default_manifest() -> Vec<Migration> {
    vec![Migration {
        version: Semver::new(0, 11, 0),
        transforms: vec![
            ObjectTransform {
                kind: ObjectKind::Component,
                transform: Box::new(|raw| {
                    patch_json(raw, |map| {
                        let mut changed = false;
                        if !map.contains_key("deprecated") {
                            map.insert("deprecated".into(), Value::Bool(false));
                            changed = true;
                        }
                        if !map.contains_key("versions") {
                            map.insert("versions".into(), Value::Object(Default::default()));
                            changed = true;
                        }
                        changed
                    })
                }),
            },
            ObjectTransform {
                kind: ObjectKind::Version,
                transform: Box::new(|raw| {
                    patch_json(raw, |map| {
                        let mut changed = false;
                        if !map.contains_key("package_dependencies") {
                            map.insert(
                                "package_dependencies".into(),
                                Value::Object(Default::default()),
                            );
                            changed = true;
                        }
                        if !map.contains_key("flattened_dependencies") {
                            map.insert("flattened_dependencies".into(), Value::Array(vec![]));
                            changed = true;
                        }
                        changed
                    })
                }),
            },
        ],
    }]
}

impl Scope {
    /// Run the shipped migration manifest. No-op when the recorded scope
    /// version is already current.
    pub fn migrate(&mut self, verbose: bool) -> ScopeResult<MigrationResult> {
        self.migrate_with(default_manifest(), verbose)
    }

    /// Run an explicit manifest. Exposed for embedders carrying their own
    /// migrations.
    pub fn migrate_with(
        &mut self,
        manifest: Vec<Migration>,
        verbose: bool,
    ) -> ScopeResult<MigrationResult> {
        let current = engine_version();
        let recorded = self.descriptor().version.clone();
        if recorded >= current {
            return Ok(MigrationResult {
                run: false,
                success: true,
                migrated: 0,
            });
        }

        let result = self.apply_manifest(&manifest, &recorded, &current, verbose);
        match result {
            Ok(migrated) => {
                self.descriptor_mut().version = current;
                let root = self.root().to_path_buf();
                self.descriptor().write(&root)?;
                Ok(MigrationResult {
                    run: true,
                    success: true,
                    migrated,
                })
            }
            Err(e) => {
                // Leave the scope exactly as it was.
                self.sources_mut().objects_mut().discard_staged()?;
                Err(e)
            }
        }
    }

    fn apply_manifest(
        &mut self,
        manifest: &[Migration],
        recorded: &Semver,
        current: &Semver,
        verbose: bool,
    ) -> ScopeResult<usize> {
        let mut applicable: Vec<&Migration> = manifest
            .iter()
            .filter(|m| m.version > *recorded && m.version <= *current)
            .collect();
        applicable.sort_by(|a, b| a.version.cmp(&b.version));

        let raws = self.sources().objects().list_raw_objects()?;
        if verbose {
            info!(
                objects = raws.len(),
                migrations = applicable.len(),
                from = %recorded,
                to = %current,
                "running scope migration"
            );
        }

        // First pass: per-object transforms.
        let mut ref_updates: BTreeMap<ObjectRef, ObjectRef> = BTreeMap::new();
        let mut objects: Vec<(ObjectRef, RawObject, bool)> = Vec::with_capacity(raws.len());
        for raw in raws {
            let mut object = raw.clone();
            let mut changed = false;
            for migration in &applicable {
                for transform in &migration.transforms {
                    if transform.kind.tag() != object.tag {
                        continue;
                    }
                    if let Some(bytes) = (transform.transform)(&object)? {
                        if bytes != object.bytes {
                            object = RawObject::from_encoded(bytes)?;
                            changed = true;
                        }
                    }
                }
            }
            if changed {
                ref_updates.insert(raw.reference, object.reference);
                debug!(
                    from = %raw.reference.short_hex(),
                    to = %object.reference.short_hex(),
                    tag = %object.tag,
                    "object migrated"
                );
            }
            objects.push((raw.reference, object, changed));
        }

        // Second pass: repoint catalogs whose version objects changed ref.
        if !ref_updates.is_empty() {
            for (_, object, changed) in &mut objects {
                if object.tag != ObjectKind::Component.tag() {
                    continue;
                }
                let ScopeObject::Component(mut component) = ScopeObject::decode(&object.bytes)?
                else {
                    continue;
                };
                let mut repointed = false;
                for reference in component.versions.values_mut() {
                    if let Some(updated) = ref_updates.get(reference) {
                        *reference = *updated;
                        repointed = true;
                    }
                }
                if repointed {
                    let bytes = ScopeObject::Component(component).encode()?;
                    *object = RawObject::from_encoded(bytes)?;
                    *changed = true;
                }
            }
        }

        let mut migrated = 0;
        for (old_ref, object, changed) in objects {
            if !changed {
                continue;
            }
            self.sources_mut().objects_mut().add_raw(object.bytes)?;
            self.sources_mut().objects_mut().remove(&old_ref);
            migrated += 1;
        }
        self.sources_mut().objects_mut().persist()?;
        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_transform_fills_missing_fields() {
        let payload = br#"{"scope":null,"namespace":"ui","name":"button","versions":{}}"#;
        let raw = RawObject::from_encoded(frame("component", payload)).unwrap();
        let manifest = default_manifest();
        let transform = &manifest[0].transforms[0];

        let migrated = (transform.transform)(&raw).unwrap().expect("should change");
        let object = ScopeObject::decode(&migrated).unwrap();
        assert!(!object.as_component().unwrap().deprecated);
    }

    #[test]
    fn component_transform_is_idempotent() {
        let payload =
            br#"{"scope":null,"namespace":"ui","name":"button","versions":{},"deprecated":false}"#;
        let raw = RawObject::from_encoded(frame("component", payload)).unwrap();
        let manifest = default_manifest();
        let transform = &manifest[0].transforms[0];
        assert!((transform.transform)(&raw).unwrap().is_none());
    }

    #[test]
    fn source_objects_are_untouched_by_manifest() {
        let manifest = default_manifest();
        for migration in &manifest {
            for transform in &migration.transforms {
                assert_ne!(transform.kind, ObjectKind::Source);
            }
        }
    }
}
