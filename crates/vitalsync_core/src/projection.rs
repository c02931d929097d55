//! Realtime projection: the volatile subset of each entity that periodic
//! full-mode pushes carry.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use vitalsync_protocol::{EntityMap, Snapshot};

/// Wildcard segment matching every object key or array index.
pub const WILDCARD: &str = "*";

/// Per-collection allow-list of path patterns.
///
/// A pattern keeps the subtree at its path. `*` matches any key or index,
/// so `medications.*.nextDue` keeps `nextDue` on every medication. Arrays
/// keep their length. Collections without patterns are copied whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    patterns: BTreeMap<String, Vec<Vec<String>>>,
}

impl Projection {
    /// Creates a projection that copies everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds patterns for one collection.
    #[must_use]
    pub fn with_collection(mut self, collection: &str, patterns: &[&str]) -> Self {
        let entry = self.patterns.entry(collection.to_owned()).or_default();
        entry.extend(
            patterns
                .iter()
                .map(|p| p.split('.').map(str::to_owned).collect::<Vec<_>>()),
        );
        self
    }

    /// Returns true if `collection` is filtered.
    pub fn covers(&self, collection: &str) -> bool {
        self.patterns.contains_key(collection)
    }

    /// Projects one entity of `collection`.
    pub fn project_entity(&self, collection: &str, entity: &Value) -> Value {
        let Some(patterns) = self.patterns.get(collection) else {
            return entity.clone();
        };
        let mut out = Value::Object(Map::new());
        for pattern in patterns {
            copy_matching(entity, &mut out, pattern);
        }
        out
    }

    /// Projects every entity of a snapshot, keeping its label, timestamp and
    /// aggregates.
    pub fn project(&self, snapshot: &Snapshot) -> Snapshot {
        let collections = snapshot
            .collections
            .iter()
            .map(|(name, entities)| {
                let projected: EntityMap = entities
                    .iter()
                    .map(|(id, entity)| (id.clone(), self.project_entity(name, entity)))
                    .collect();
                (name.clone(), projected)
            })
            .collect();
        Snapshot {
            ward: snapshot.ward.clone(),
            collections,
            timestamp: snapshot.timestamp,
            metrics: snapshot.metrics.clone(),
        }
    }
}

fn copy_matching(src: &Value, dst: &mut Value, pattern: &[String]) {
    let Some((head, rest)) = pattern.split_first() else {
        *dst = src.clone();
        return;
    };
    match src {
        Value::Object(map) if head == WILDCARD => {
            for (key, child) in map {
                if let Some(slot) = object_slot(dst, key) {
                    copy_matching(child, slot, rest);
                }
            }
        }
        Value::Object(map) => {
            if let Some(child) = map.get(head.as_str()) {
                if let Some(slot) = object_slot(dst, head) {
                    copy_matching(child, slot, rest);
                }
            }
        }
        Value::Array(items) => {
            let selected: Option<usize> = head.parse().ok();
            if head != WILDCARD && selected.is_none() {
                return;
            }
            if !matches!(dst, Value::Array(existing) if existing.len() == items.len()) {
                *dst = Value::Array(vec![Value::Null; items.len()]);
            }
            if let Value::Array(out) = dst {
                for (i, (child, slot)) in items.iter().zip(out.iter_mut()).enumerate() {
                    if selected.map_or(true, |s| s == i) {
                        copy_matching(child, slot, rest);
                    }
                }
            }
        }
        _ => {}
    }
}

fn object_slot<'a>(dst: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    if !dst.is_object() {
        *dst = Value::Object(Map::new());
    }
    dst.as_object_mut()
        .map(|map| map.entry(key.to_owned()).or_insert(Value::Null))
}
