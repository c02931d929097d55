//! Store statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for mutation activity.
///
/// All counters are atomic and can be read while a pass is running.
#[derive(Debug, Default)]
pub(crate) struct StoreStats {
    /// Mutation passes run (ticks and single-collection passes).
    passes: AtomicU64,
    /// Change records emitted.
    changes: AtomicU64,
    /// Passes that changed nothing.
    empty_passes: AtomicU64,
    /// Full regenerations.
    regenerations: AtomicU64,
}

impl StoreStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pass(&self, changes: usize) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.changes.fetch_add(changes as u64, Ordering::Relaxed);
        if changes == 0 {
            self.empty_passes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_regeneration(&self) {
        self.regenerations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of passes run.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Returns the number of change records emitted.
    pub fn changes(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }

    /// Returns the number of passes that changed nothing.
    pub fn empty_passes(&self) -> u64 {
        self.empty_passes.load(Ordering::Relaxed)
    }

    /// Returns the number of regenerations.
    pub fn regenerations(&self) -> u64 {
        self.regenerations.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            passes: self.passes(),
            changes: self.changes(),
            empty_passes: self.empty_passes(),
            regenerations: self.regenerations(),
        }
    }
}

/// Point-in-time copy of the store's mutation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    /// Mutation passes run.
    pub passes: u64,
    /// Change records emitted.
    pub changes: u64,
    /// Passes that changed nothing.
    pub empty_passes: u64,
    /// Full regenerations.
    pub regenerations: u64,
}
