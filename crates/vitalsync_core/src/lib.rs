//! # VitalSync Core
//!
//! The shared entity store and its mutation engine.
//!
//! An [`EntityStore`] owns every entity, generated once by an
//! [`EntityGenerator`] and mutated in place by periodic passes. Each pass
//! records its own field-level changes as it writes them, so callers get an
//! exact [`ChangeRecord`](vitalsync_protocol::ChangeRecord) list without
//! diffing snapshots afterwards.
//!
//! ```rust,ignore
//! use vitalsync_core::{EntityStore, MutationConfig};
//!
//! let store = EntityStore::ward(MutationConfig::default())?;
//! let tick = store.tick();
//! println!("{} changes", tick.changes.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod generator;
mod profile;
mod projection;
mod recorder;
mod stats;
mod store;

pub use config::MutationConfig;
pub use error::{StoreError, StoreResult};
pub use generator::{EntityGenerator, WardGenerator, EQUIPMENT, PATIENTS};
pub use profile::{
    number_value, round_to, timestamp_value, MutationProfile, NumericField, NumericGroup,
    ScheduleRule, StatusRule, WeightedChoice,
};
pub use projection::{Projection, WILDCARD};
pub use stats::StoreStatsSnapshot;
pub use store::{EntityStore, TickOutput, VersionedSnapshot};
