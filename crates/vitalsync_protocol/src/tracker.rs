//! Structural diff between two versions of entity value trees.

use crate::change::ChangeRecord;
use crate::path::{flatten_leaves, get_value};
use crate::snapshot::{EntityMap, Snapshot};
use serde_json::Value;

/// Computes field-level changes between before and after value trees.
///
/// Composite values are flattened to their leaves, so each changed
/// sub-component yields its own record. Output order is collection, then
/// entity id, then field path. Removed fields are not reported, and a leaf
/// that appears with a `null` value is indistinguishable from absence.
pub struct ChangeTracker;

impl ChangeTracker {
    /// Diffs one entity.
    pub fn diff_entity(
        collection: &str,
        entity_id: &str,
        before: &Value,
        after: &Value,
    ) -> Vec<ChangeRecord> {
        flatten_leaves(after)
            .into_iter()
            .filter_map(|(path, new_value)| {
                let old_value = get_value(before, path.as_str()).cloned().unwrap_or(Value::Null);
                ChangeRecord::new(collection, entity_id, path, old_value, new_value.clone())
            })
            .collect()
    }

    /// Diffs every entity present in `after`.
    pub fn diff_collection(
        collection: &str,
        before: &EntityMap,
        after: &EntityMap,
    ) -> Vec<ChangeRecord> {
        let empty = Value::Null;
        after
            .iter()
            .flat_map(|(id, entity)| {
                let prior = before.get(id).unwrap_or(&empty);
                Self::diff_entity(collection, id, prior, entity)
            })
            .collect()
    }

    /// Diffs every collection present in `after`.
    pub fn diff_snapshots(before: &Snapshot, after: &Snapshot) -> Vec<ChangeRecord> {
        let empty = EntityMap::new();
        after
            .collections
            .iter()
            .flat_map(|(name, entities)| {
                let prior = before.collection(name).unwrap_or(&empty);
                Self::diff_collection(name, prior, entities)
            })
            .collect()
    }
}
