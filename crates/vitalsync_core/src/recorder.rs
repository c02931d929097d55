//! Inline change recording during a mutation pass.

use serde_json::Value;
use vitalsync_protocol::{get_value, set_value, ChangeRecord, SetOutcome};

/// Writes fields of one entity and records each actual change as it happens.
pub(crate) struct ChangeRecorder<'a> {
    collection: &'a str,
    entity_id: &'a str,
    entity: &'a mut Value,
    out: &'a mut Vec<ChangeRecord>,
}

impl<'a> ChangeRecorder<'a> {
    pub(crate) fn new(
        collection: &'a str,
        entity_id: &'a str,
        entity: &'a mut Value,
        out: &'a mut Vec<ChangeRecord>,
    ) -> Self {
        Self {
            collection,
            entity_id,
            entity,
            out,
        }
    }

    /// Reads a field of the entity.
    pub(crate) fn get(&self, path: &str) -> Option<&Value> {
        get_value(&*self.entity, path)
    }

    /// Sets a field. Returns true if the value changed.
    pub(crate) fn set(&mut self, path: &str, value: Value) -> bool {
        let old = self.get(path).cloned().unwrap_or(Value::Null);
        if old == value {
            return false;
        }
        if set_value(&mut *self.entity, path, value.clone()) == SetOutcome::Rejected {
            return false;
        }
        if let Some(record) = ChangeRecord::new(self.collection, self.entity_id, path, old, value) {
            self.out.push(record);
        }
        true
    }
}
