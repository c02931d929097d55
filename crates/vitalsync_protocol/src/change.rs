//! Field-level change records and the patches built from them.

use crate::path::{set_value, FieldPath, SetOutcome};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One field's before/after pair produced by a mutation pass.
///
/// A record never carries equal old and new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Collection name.
    pub collection: String,
    /// Entity id within the collection.
    pub entity_id: String,
    /// Path of the changed leaf.
    pub field_path: FieldPath,
    /// Value before the change.
    pub old_value: Value,
    /// Value after the change.
    pub new_value: Value,
}

impl ChangeRecord {
    /// Creates a record, or `None` when the values are equal.
    pub fn new(
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        field_path: impl Into<FieldPath>,
        old_value: Value,
        new_value: Value,
    ) -> Option<Self> {
        if old_value == new_value {
            return None;
        }
        Some(Self {
            collection: collection.into(),
            entity_id: entity_id.into(),
            field_path: field_path.into(),
            old_value,
            new_value,
        })
    }
}

/// Counts from applying a [`Patch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Fields written over an existing slot.
    pub applied: usize,
    /// Fields written after creating missing containers.
    pub created: usize,
    /// Fields not written: unknown collection or entity, or an unusable path.
    pub skipped: usize,
}

impl ApplyReport {
    /// Number of fields written.
    pub fn written(&self) -> usize {
        self.applied + self.created
    }
}

type EntityFields = BTreeMap<FieldPath, Value>;

/// Sparse field replacements grouped as `collection → entity → path → value`.
///
/// Paths within a patch are distinct, so the order in which they are applied
/// does not affect the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(BTreeMap<String, BTreeMap<String, EntityFields>>);

impl Patch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups records into a patch. Later records for the same path win.
    pub fn from_changes<'a>(changes: impl IntoIterator<Item = &'a ChangeRecord>) -> Self {
        let mut patch = Self::new();
        for change in changes {
            patch.insert(
                change.collection.clone(),
                change.entity_id.clone(),
                change.field_path.clone(),
                change.new_value.clone(),
            );
        }
        patch
    }

    /// Sets one field value.
    pub fn insert(
        &mut self,
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        path: impl Into<FieldPath>,
        value: Value,
    ) {
        self.0
            .entry(collection.into())
            .or_default()
            .entry(entity_id.into())
            .or_default()
            .insert(path.into(), value);
    }

    /// Returns the value for one field.
    pub fn get(&self, collection: &str, entity_id: &str, path: &str) -> Option<&Value> {
        self.0.get(collection)?.get(entity_id)?.get(path)
    }

    /// Returns true if the patch holds no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fields in the patch.
    pub fn len(&self) -> usize {
        self.0
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Iterates `(collection, entity, path, value)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &FieldPath, &Value)> {
        self.0.iter().flat_map(|(collection, entities)| {
            entities.iter().flat_map(move |(entity_id, fields)| {
                fields
                    .iter()
                    .map(move |(path, value)| (collection.as_str(), entity_id.as_str(), path, value))
            })
        })
    }

    /// Keeps only fields whose path satisfies `keep`, dropping emptied groups.
    pub fn retain_paths(&mut self, mut keep: impl FnMut(&FieldPath) -> bool) {
        for entities in self.0.values_mut() {
            for fields in entities.values_mut() {
                fields.retain(|path, _| keep(path));
            }
            entities.retain(|_, fields| !fields.is_empty());
        }
        self.0.retain(|_, entities| !entities.is_empty());
    }

    /// Writes every field into `snapshot`.
    ///
    /// Missing containers inside an entity are created. Fields addressed to
    /// a collection or entity the snapshot does not hold are skipped. The
    /// snapshot's timestamp and aggregates are left to the caller.
    pub fn apply_to(&self, snapshot: &mut Snapshot) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (collection, entities) in &self.0 {
            for (entity_id, fields) in entities {
                let Some(entity) = snapshot.entity_mut(collection, entity_id) else {
                    report.skipped += fields.len();
                    continue;
                };
                for (path, value) in fields {
                    match set_value(entity, path.as_str(), value.clone()) {
                        SetOutcome::Updated => report.applied += 1,
                        SetOutcome::Created => report.created += 1,
                        SetOutcome::Rejected => report.skipped += 1,
                    }
                }
            }
        }
        report
    }
}
