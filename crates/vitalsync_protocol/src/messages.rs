//! Protocol messages exchanged over the duplex connection.
//!
//! Every frame is a JSON object with a snake_case `type` tag. Payload field
//! names are camelCase.

use crate::change::Patch;
use crate::error::{ProtocolError, ProtocolResult};
use crate::metrics::PerformanceReport;
use crate::snapshot::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Replication strategy for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Ship the realtime snapshot every tick.
    #[default]
    Full,
    /// Ship every change of the tick as a patch.
    Delta,
    /// Alternate between all changes and critical changes only.
    Hybrid,
}

impl UpdateMode {
    /// All modes, in declaration order.
    pub const ALL: [UpdateMode; 3] = [UpdateMode::Full, UpdateMode::Delta, UpdateMode::Hybrid];

    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Full => "full",
            UpdateMode::Delta => "delta",
            UpdateMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpdateMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ProtocolError::InvalidMode(s.to_owned()))
    }
}

/// `updateType` of a delta update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaUpdateType {
    /// Every change of the tick.
    #[default]
    All,
}

/// `updateType` of a hybrid update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridUpdateType {
    /// Phase 0: every change of the tick.
    FullCycle,
    /// Phase 1: only allow-listed critical fields.
    CriticalOnly,
}

impl HybridUpdateType {
    /// Returns the update type emitted in the given phase.
    pub fn for_phase(phase: u8) -> Self {
        if phase == 0 {
            HybridUpdateType::FullCycle
        } else {
            HybridUpdateType::CriticalOnly
        }
    }
}

/// Preview of the phase that follows a hybrid update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextCycle {
    /// The next tick sends every change.
    NextFull,
    /// The next tick sends critical changes only.
    NextCritical,
}

impl NextCycle {
    /// Returns the preview for the phase that will run next.
    pub fn from_phase(next_phase: u8) -> Self {
        if next_phase == 0 {
            NextCycle::NextFull
        } else {
            NextCycle::NextCritical
        }
    }
}

/// Message sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Complete state, sent on connect and after regeneration.
    InitialData {
        /// Full snapshot.
        data: Snapshot,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Periodic realtime snapshot in `full` mode.
    FullDataUpdate {
        /// Realtime projection of the snapshot.
        data: Snapshot,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Realtime snapshot sent in reply to `request_full_data`.
    FullData {
        /// Realtime projection of the snapshot.
        data: Snapshot,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Periodic patch in `delta` mode.
    DeltaUpdate {
        /// Always `all`.
        update_type: DeltaUpdateType,
        /// Changed fields.
        changes: Patch,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Periodic patch in `hybrid` mode.
    HybridUpdate {
        /// Phase that produced the patch.
        update_type: HybridUpdateType,
        /// Changed fields.
        changes: Patch,
        /// Phase of the next tick.
        cycle: NextCycle,
        /// True when fields were deliberately left out.
        data_reduction: bool,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Acknowledges a mode switch.
    ModeChanged {
        /// The new mode.
        mode: UpdateMode,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Reply to `get_performance_metrics`.
    PerformanceMetrics {
        /// Server and connection counters.
        data: PerformanceReport,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    /// Every server message type tag.
    pub const TYPES: [&'static str; 7] = [
        "initial_data",
        "full_data_update",
        "full_data",
        "delta_update",
        "hybrid_update",
        "mode_changed",
        "performance_metrics",
    ];

    /// Returns the wire type tag.
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::InitialData { .. } => "initial_data",
            ServerMessage::FullDataUpdate { .. } => "full_data_update",
            ServerMessage::FullData { .. } => "full_data",
            ServerMessage::DeltaUpdate { .. } => "delta_update",
            ServerMessage::HybridUpdate { .. } => "hybrid_update",
            ServerMessage::ModeChanged { .. } => "mode_changed",
            ServerMessage::PerformanceMetrics { .. } => "performance_metrics",
        }
    }

    /// Returns true for control and diagnostic messages, which are left out
    /// of data-transfer accounting.
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            ServerMessage::ModeChanged { .. } | ServerMessage::PerformanceMetrics { .. }
        )
    }

    /// Returns the send time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ServerMessage::InitialData { timestamp, .. }
            | ServerMessage::FullDataUpdate { timestamp, .. }
            | ServerMessage::FullData { timestamp, .. }
            | ServerMessage::DeltaUpdate { timestamp, .. }
            | ServerMessage::HybridUpdate { timestamp, .. }
            | ServerMessage::ModeChanged { timestamp, .. }
            | ServerMessage::PerformanceMetrics { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the snapshot of messages that replace the mirror.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            ServerMessage::InitialData { data, .. }
            | ServerMessage::FullDataUpdate { data, .. }
            | ServerMessage::FullData { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Returns the patch of messages that merge into the mirror.
    pub fn patch(&self) -> Option<&Patch> {
        match self {
            ServerMessage::DeltaUpdate { changes, .. }
            | ServerMessage::HybridUpdate { changes, .. } => Some(changes),
            _ => None,
        }
    }

    /// Serializes the message to a JSON text frame.
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parses a JSON text frame.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let value = tagged_value(text, &Self::TYPES)?;
        serde_json::from_value(value).map_err(ProtocolError::malformed)
    }
}

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Switch the connection to another mode.
    SetUpdateMode {
        /// Requested mode.
        mode: UpdateMode,
    },
    /// Ask for the realtime snapshot now.
    RequestFullData,
    /// Regenerate all entities and resend `initial_data`.
    RequestInitialData,
    /// Ask for server and connection counters.
    GetPerformanceMetrics,
}

impl ClientMessage {
    /// Every client message type tag.
    pub const TYPES: [&'static str; 4] = [
        "set_update_mode",
        "request_full_data",
        "request_initial_data",
        "get_performance_metrics",
    ];

    /// Returns the wire type tag.
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::SetUpdateMode { .. } => "set_update_mode",
            ClientMessage::RequestFullData => "request_full_data",
            ClientMessage::RequestInitialData => "request_initial_data",
            ClientMessage::GetPerformanceMetrics => "get_performance_metrics",
        }
    }

    /// Serializes the message to a JSON text frame.
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parses a JSON text frame.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let value = tagged_value(text, &Self::TYPES)?;
        if let Some(mode) = value.get("mode").and_then(Value::as_str) {
            mode.parse::<UpdateMode>()?;
        }
        serde_json::from_value(value).map_err(ProtocolError::malformed)
    }
}

/// Parses `text` as a JSON object whose `type` is one of `known`.
fn tagged_value(text: &str, known: &[&str]) -> ProtocolResult<Value> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::malformed)?;
    if !value.is_object() {
        return Err(ProtocolError::Malformed("frame is not a JSON object".into()));
    }
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !known.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_owned()));
    }
    Ok(value)
}
