//! # VitalSync Protocol
//!
//! Wire types and change tracking for VitalSync.
//!
//! This crate provides:
//! - `Snapshot` and the per-collection entity maps it carries
//! - `ChangeRecord` and `Patch` for field-level replication
//! - `ChangeTracker` for diffing entity value trees
//! - Server and client messages with their JSON codecs
//! - Transfer-rate accounting shared by both ends of a connection
//! - `Frame`, the transport unit both ends exchange
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod error;
mod frame;
mod messages;
mod metrics;
mod path;
mod snapshot;
mod tracker;

pub use change::{ApplyReport, ChangeRecord, Patch};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{Frame, NORMAL_CLOSE, TRY_AGAIN_LATER};
pub use messages::{
    ClientMessage, DeltaUpdateType, HybridUpdateType, NextCycle, ServerMessage, UpdateMode,
};
pub use metrics::{
    per_second, ConnectionReport, PerformanceReport, RateWindow, ServerReport,
    DEFAULT_RATE_WINDOW,
};
pub use path::{flatten_leaves, get_value, set_value, FieldPath, SetOutcome};
pub use snapshot::{EntityMap, Snapshot, SnapshotMetrics, STATUS_FIELD};
pub use tracker::ChangeTracker;
