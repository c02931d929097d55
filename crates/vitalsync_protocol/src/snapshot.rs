//! Full-state snapshots of every entity collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Entities of one collection keyed by their stable id.
pub type EntityMap = BTreeMap<String, Value>;

/// Field used to count entities by status.
pub const STATUS_FIELD: &str = "status";

/// Aggregates derived from a snapshot's entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetrics {
    /// Number of entities per collection.
    pub totals: BTreeMap<String, usize>,
    /// Per collection, number of entities per `status` value.
    pub by_status: BTreeMap<String, BTreeMap<String, usize>>,
}

impl SnapshotMetrics {
    /// Computes the aggregates for a set of collections.
    pub fn compute(collections: &BTreeMap<String, EntityMap>) -> Self {
        let mut metrics = Self::default();
        for (name, entities) in collections {
            metrics.totals.insert(name.clone(), entities.len());
            let counts = metrics.by_status.entry(name.clone()).or_default();
            for status in entities
                .values()
                .filter_map(|e| e.get(STATUS_FIELD).and_then(Value::as_str))
            {
                *counts.entry(status.to_owned()).or_insert(0) += 1;
            }
        }
        metrics
    }

    /// Returns how many entities of `collection` have the given status.
    pub fn status_count(&self, collection: &str, status: &str) -> usize {
        self.by_status
            .get(collection)
            .and_then(|c| c.get(status))
            .copied()
            .unwrap_or(0)
    }
}

/// The complete value of every collection at one point in time.
///
/// On the wire, each collection is a top-level key next to `ward`,
/// `timestamp` and `metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Label of the ward this state describes.
    pub ward: String,
    /// Collections by name.
    #[serde(flatten)]
    pub collections: BTreeMap<String, EntityMap>,
    /// Time of the last refresh.
    pub timestamp: DateTime<Utc>,
    /// Aggregates as of the last refresh.
    #[serde(default)]
    pub metrics: SnapshotMetrics,
}

impl Snapshot {
    /// Creates a snapshot and computes its aggregates.
    pub fn new(
        ward: impl Into<String>,
        collections: BTreeMap<String, EntityMap>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut snapshot = Self {
            ward: ward.into(),
            collections,
            timestamp: now,
            metrics: SnapshotMetrics::default(),
        };
        snapshot.refresh(now);
        snapshot
    }

    /// Creates a snapshot with no collections.
    pub fn empty(ward: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(ward, BTreeMap::new(), now)
    }

    /// Returns a collection by name.
    pub fn collection(&self, name: &str) -> Option<&EntityMap> {
        self.collections.get(name)
    }

    /// Returns one entity.
    pub fn entity(&self, collection: &str, id: &str) -> Option<&Value> {
        self.collections.get(collection).and_then(|c| c.get(id))
    }

    /// Returns one entity mutably.
    pub fn entity_mut(&mut self, collection: &str, id: &str) -> Option<&mut Value> {
        self.collections.get_mut(collection).and_then(|c| c.get_mut(id))
    }

    /// Recomputes the aggregates and moves the timestamp to `now`.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.metrics = SnapshotMetrics::compute(&self.collections);
        self.timestamp = now;
    }

    /// Total number of entities across collections.
    pub fn entity_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Compares entity content only, ignoring timestamp and aggregates.
    pub fn collections_eq(&self, other: &Snapshot) -> bool {
        self.collections == other.collections
    }
}
