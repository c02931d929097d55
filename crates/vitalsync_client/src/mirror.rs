//! The client's local copy of server state.

use vitalsync_protocol::{ApplyReport, ServerMessage, Snapshot};

/// What applying one message did to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorUpdate {
    /// The mirror was replaced wholesale.
    Replaced,
    /// A patch was applied in place.
    Patched(ApplyReport),
    /// A patch arrived before any snapshot and was dropped.
    NoBase,
    /// The message carries no state.
    Unchanged,
}

/// Local mirror of the server's entity collections.
#[derive(Debug, Clone, Default)]
pub struct ClientMirror {
    snapshot: Option<Snapshot>,
}

impl ClientMirror {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mirrored snapshot, if one has arrived.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Returns true until the first snapshot arrives.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none()
    }

    /// Drops all mirrored state.
    pub fn clear(&mut self) {
        self.snapshot = None;
    }

    /// Applies one server message.
    ///
    /// Snapshot messages replace the mirror. Patch messages write each field
    /// in place, creating missing containers, and then refresh the
    /// timestamp and aggregates to the message time.
    pub fn apply(&mut self, message: &ServerMessage) -> MirrorUpdate {
        if let Some(snapshot) = message.snapshot() {
            self.snapshot = Some(snapshot.clone());
            return MirrorUpdate::Replaced;
        }
        let Some(patch) = message.patch() else {
            return MirrorUpdate::Unchanged;
        };
        let Some(snapshot) = self.snapshot.as_mut() else {
            return MirrorUpdate::NoBase;
        };
        let report = patch.apply_to(snapshot);
        snapshot.refresh(message.timestamp());
        MirrorUpdate::Patched(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use vitalsync_protocol::{DeltaUpdateType, EntityMap, Patch, UpdateMode};

    fn base() -> Snapshot {
        let mut patients = EntityMap::new();
        patients.insert("P001".into(), json!({"status": "stable", "vitals": {"heartRate": 70}}));
        let mut collections = BTreeMap::new();
        collections.insert("patients".to_string(), patients);
        Snapshot::new("ICU-A", collections, Utc::now())
    }

    fn delta(patch: Patch) -> ServerMessage {
        ServerMessage::DeltaUpdate {
            update_type: DeltaUpdateType::All,
            changes: patch,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn patch_before_snapshot_is_dropped() {
        let mut mirror = ClientMirror::new();
        let mut patch = Patch::new();
        patch.insert("patients", "P001", "vitals.heartRate", json!(80));
        assert_eq!(mirror.apply(&delta(patch)), MirrorUpdate::NoBase);
        assert!(mirror.is_empty());
    }

    #[test]
    fn patch_creates_missing_containers() {
        let mut mirror = ClientMirror::new();
        let initial = ServerMessage::InitialData {
            data: base(),
            timestamp: Utc::now(),
        };
        assert_eq!(mirror.apply(&initial), MirrorUpdate::Replaced);

        let mut patch = Patch::new();
        patch.insert("patients", "P001", "vitals.heartRate", json!(80));
        patch.insert("patients", "P001", "vitals.bloodPressure.systolic", json!(120));
        patch.insert("patients", "P404", "status", json!("critical"));
        let message = delta(patch);

        let MirrorUpdate::Patched(report) = mirror.apply(&message) else {
            panic!("expected a patch");
        };
        assert_eq!(report.applied, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);

        let snapshot = mirror.snapshot().unwrap();
        let patient = snapshot.entity("patients", "P001").unwrap();
        assert_eq!(patient["vitals"]["heartRate"], 80);
        assert_eq!(patient["vitals"]["bloodPressure"]["systolic"], 120);
        assert_eq!(snapshot.timestamp, message.timestamp());
    }

    #[test]
    fn meta_messages_leave_mirror_alone() {
        let mut mirror = ClientMirror::new();
        let ack = ServerMessage::ModeChanged {
            mode: UpdateMode::Delta,
            timestamp: Utc::now(),
        };
        assert_eq!(mirror.apply(&ack), MirrorUpdate::Unchanged);
    }
}
