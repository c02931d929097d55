//! Dot-separated field paths into nested JSON value trees.
//!
//! A path such as `vitals.bloodPressure.systolic` addresses one leaf of an
//! entity. Object keys are matched by name; array items are addressed by
//! their decimal index (`medications.0.lastGiven`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// A dot-separated path to a leaf inside an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    /// Creates a path from its string form.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(PATH_SEPARATOR)
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self(segment.to_owned())
        } else {
            Self(format!("{}{PATH_SEPARATOR}{segment}", self.0))
        }
    }

    /// Returns true if the path is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if every segment is non-empty.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.segments().all(|s| !s.is_empty())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FieldPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FieldPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self(path.to_owned())
    }
}

impl From<String> for FieldPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Result of writing a value at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// An existing slot was overwritten.
    Updated,
    /// One or more missing containers or the leaf itself were created.
    Created,
    /// The path could not be written (empty segment, or a named key into
    /// an array).
    Rejected,
}

/// Looks up the value at `path`, if every segment exists.
pub fn get_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split(PATH_SEPARATOR)
        .try_fold(root, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Writes `value` at `path`, creating missing intermediate containers.
///
/// Missing object keys are inserted, array indexes past the end grow the
/// array with `null`, and scalar intermediates are replaced by objects.
pub fn set_value(root: &mut Value, path: &str, value: Value) -> SetOutcome {
    if path.is_empty() || path.split(PATH_SEPARATOR).any(str::is_empty) {
        return SetOutcome::Rejected;
    }

    let mut created = false;
    let mut current = root;
    for segment in path.split(PATH_SEPARATOR) {
        current = match child_slot(current, segment, &mut created) {
            Some(slot) => slot,
            None => return SetOutcome::Rejected,
        };
    }
    *current = value;

    if created {
        SetOutcome::Created
    } else {
        SetOutcome::Updated
    }
}

fn child_slot<'a>(current: &'a mut Value, segment: &str, created: &mut bool) -> Option<&'a mut Value> {
    let index = segment.parse::<usize>().ok();
    match (current, index) {
        (Value::Object(map), _) => {
            if !map.contains_key(segment) {
                *created = true;
            }
            Some(map.entry(segment.to_owned()).or_insert(Value::Null))
        }
        (Value::Array(items), Some(index)) => {
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
                *created = true;
            }
            items.get_mut(index)
        }
        (Value::Array(_), None) => None,
        (slot, _) => {
            *slot = Value::Object(Map::new());
            *created = true;
            slot.as_object_mut()
                .map(|map| map.entry(segment.to_owned()).or_insert(Value::Null))
        }
    }
}

/// Flattens a value tree into `(path, leaf)` pairs in key order.
///
/// Leaves are scalars and empty containers. A scalar root has no path and
/// yields nothing.
pub fn flatten_leaves(root: &Value) -> Vec<(FieldPath, &Value)> {
    let mut out = Vec::new();
    match root {
        Value::Object(map) => {
            for (key, child) in map {
                walk(FieldPath::new(key.as_str()), child, &mut out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                walk(FieldPath::new(i.to_string()), child, &mut out);
            }
        }
        _ => {}
    }
    out
}

fn walk<'a>(path: FieldPath, value: &'a Value, out: &mut Vec<(FieldPath, &'a Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                walk(path.child(key), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                walk(path.child(&i.to_string()), child, out);
            }
        }
        _ => out.push((path, value)),
    }
}
